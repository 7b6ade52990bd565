//! Filing index error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Index invariant violated: {0}")]
    InvariantViolation(String),
}
