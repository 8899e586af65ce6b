use crate::{
    error::{Result, SineError},
    fetch::Fetch,
};
use std::collections::HashMap;

/// Serves fixed bodies by exact URL; anything else is missing.
#[derive(Default)]
pub struct StaticFetch {
    bodies: HashMap<String, Vec<u8>>,
}

impl StaticFetch {
    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }
}

impl Fetch for StaticFetch {
    fn fetch_text(&self, url: &str) -> Option<String> {
        self.bodies
            .get(url)
            .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| SineError::NotFound(url.to_string()))
    }
}
