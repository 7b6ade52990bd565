//! Normalization of raw e-file documents into JSON trees.

mod xml;

use thiserror::Error;

pub use xml::XmlJsonTranslator;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Conversion failed: {0}")]
    Conversion(String),
}

/// Converts the raw bytes of one filing into its normalized tree.
///
/// Implementations are called from blocking worker threads, several at a
/// time, and must not hold mutable shared state.
pub trait Translator: Send + Sync {
    fn translate(&self, raw: &[u8]) -> Result<serde_json::Value, TranslateError>;
}
