pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod files;
pub mod fs;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod marketplace;
pub mod notify;
pub mod paths;
pub mod prefs;
pub mod registry;
pub mod repo;
pub mod resolver;
pub mod scripts;
pub mod styles;
pub mod stylesheets;
#[cfg(test)]
mod test_support;
pub mod version;

pub use error::{Result, SineError};
