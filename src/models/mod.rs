//! Data models for the e-file composer.

mod filing;

#[cfg(test)]
pub(crate) use filing::fixtures;
pub use filing::{
    content_key_for, parse_uploaded, record_id_for, FilingMetadata, FilingParseError,
    SUBMITTED_STORAGE_FORMAT, UPLOADED_STORAGE_FORMAT,
};
