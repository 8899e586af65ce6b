use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid repository reference: {0}")]
    InvalidRepo(String),
    #[error("could not resolve a manifest for {0}")]
    Unresolvable(String),
    #[error("update failed: {0}")]
    Update(String),
    #[error("engine rollback failed for {path:?}: {reason}")]
    Rollback { path: PathBuf, reason: String },
    #[error("config error: {0}")]
    Config(String),
}

impl SineError {
    pub fn http(err: impl std::fmt::Display) -> Self {
        SineError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SineError>;
