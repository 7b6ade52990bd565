//! Blob store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },
    #[error("Access denied for {key} (HTTP {status})")]
    Access { key: String, status: u16 },
    #[error("Unexpected HTTP {status} for {key}")]
    Status { key: String, status: u16 },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("I/O error reading {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Invalid bucket location: {0}")]
    InvalidLocation(String),
}

impl StoreError {
    /// Whether the error means the object simply is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
