use super::config::ConfigError;
use crate::core::models::property::PropertyId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue backend failed to provision a worker: {0}")]
    ResourceProvisioning(String),

    #[error("Failed to submit estimation request: {0}")]
    Submission(String),

    #[error("{} propert{} failed during estimation", failures.len(), if failures.len() == 1 { "y" } else { "ies" })]
    Estimation {
        failures: BTreeMap<PropertyId, String>,
    },

    #[error("Expected input file does not exist: {path}", path = path.display())]
    MissingInput { path: PathBuf },

    #[error("I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize or deserialize {context}: {message}")]
    Serialization { context: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl EngineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn serialization(context: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Serialization {
            context: context.into(),
            message: error.to_string(),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}
