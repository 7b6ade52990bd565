//! Per-organization composite documents.
//!
//! Each organization's composite is one JSON object mapping tax period to the
//! normalized content of the latest filing for that period.

mod paths;
mod writer;

use std::path::PathBuf;

use thiserror::Error;

pub use paths::{ShardedPaths, MAX_SHARD_DEPTH};
pub use writer::CompositeWriter;

use crate::pipeline::ErrorKind;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Invalid entity id '{0}'")]
    InvalidEntity(String),
    #[error("Shard depth must be between 1 and {max}, got {depth}")]
    InvalidDepth { depth: usize, max: usize },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed composite {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Composite {0} is not a JSON object")]
    NotAnObject(PathBuf),
}

impl ComposeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Storage,
            Self::InvalidEntity(_)
            | Self::InvalidDepth { .. }
            | Self::Json { .. }
            | Self::NotAnObject(_) => ErrorKind::InvariantViolation,
        }
    }
}
