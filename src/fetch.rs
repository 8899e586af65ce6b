use crate::error::{Result, SineError};
use serde_json::Value;
use std::{io::Read, time::Duration};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("Sine/", env!("CARGO_PKG_VERSION"));
const NOT_FOUND_BODY: &str = "404: not found";

/// HTTP GET surface used by every remote lookup.
///
/// Metadata lookups are tolerant: a 404, a network failure or GitHub's raw
/// `404: Not Found` body all come back as `None`. Payloads that must arrive
/// intact (archives, scripts) go through [`Fetch::fetch_bytes`], which errors.
pub trait Fetch: Send + Sync {
    fn fetch_text(&self, url: &str) -> Option<String>;

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Parsed JSON, or `None` when the body is missing or not JSON.
    fn fetch_json(&self, url: &str) -> Option<Value> {
        let body = self.fetch_text(url)?;
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(url, %err, "response is not JSON");
                None
            }
        }
    }

    /// Like [`Fetch::fetch_json`] but only accepts a JSON object.
    fn fetch_object(&self, url: &str) -> Option<serde_json::Map<String, Value>> {
        match self.fetch_json(url)? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn exists(&self, url: &str) -> bool {
        self.fetch_text(url).is_some()
    }
}

pub fn is_not_found_body(body: &str) -> bool {
    body.trim().eq_ignore_ascii_case(NOT_FOUND_BODY)
}

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(60))
            .build();
        Self { agent }
    }

    fn call(&self, url: &str) -> std::result::Result<ureq::Response, ureq::Error> {
        self.agent.get(url).set("User-Agent", USER_AGENT).call()
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetcher {
    fn fetch_text(&self, url: &str) -> Option<String> {
        let response = match self.call(url) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                debug!(url, code, "remote returned error status");
                return None;
            }
            Err(err) => {
                warn!(url, %err, "fetch failed");
                return None;
            }
        };
        let body = match response.into_string() {
            Ok(body) => body,
            Err(err) => {
                warn!(url, %err, "read response body failed");
                return None;
            }
        };
        if is_not_found_body(&body) {
            return None;
        }
        Some(body)
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.call(url).map_err(|err| match err {
            ureq::Error::Status(404, _) => SineError::NotFound(url.to_string()),
            other => SineError::http(format!("{url}: {other}")),
        })?;
        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}
