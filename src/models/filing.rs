//! E-file metadata as published in the yearly IRS indices.
//!
//! A filing is identified globally by its IRS object id (`filing_id`). The
//! `record_id` names the (EIN, tax period) slot the filing reports on; amended
//! returns share a `record_id` with the filing they replace.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Formats accepted for `LastUpdated` in the published indices.
const UPLOADED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Storage format for upload timestamps.
///
/// Fractional seconds are kept when present; whole seconds print without a
/// fraction.
pub const UPLOADED_STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Storage format for submission dates.
pub const SUBMITTED_STORAGE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilingParseError {
    #[error("index entry is not a JSON object")]
    NotAnObject,
    #[error("index entry is missing field '{0}'")]
    MissingField(&'static str),
    #[error("index entry field '{field}' has invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

/// Metadata describing one submitted e-file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingMetadata {
    /// `<entity_id>_<period>`; shared across amendments.
    pub record_id: String,
    /// IRS object id; globally unique.
    pub filing_id: String,
    /// Document locator number.
    pub dln: String,
    /// Employer identification number of the filer.
    pub entity_id: String,
    /// Tax period (YYYYMM).
    pub period: String,
    pub organization_name: String,
    pub form_type: String,
    pub submitted_date: NaiveDate,
    pub uploaded_timestamp: NaiveDateTime,
    pub downloaded_timestamp: DateTime<Utc>,
    pub url: String,
}

/// Derive the record id for an (entity, period) slot.
pub fn record_id_for(entity_id: &str, period: &str) -> String {
    format!("{}_{}", entity_id, period)
}

impl FilingMetadata {
    /// Create filing metadata, deriving the record id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filing_id: String,
        dln: String,
        entity_id: String,
        period: String,
        organization_name: String,
        form_type: String,
        submitted_date: NaiveDate,
        uploaded_timestamp: NaiveDateTime,
        downloaded_timestamp: DateTime<Utc>,
        url: String,
    ) -> Self {
        Self {
            record_id: record_id_for(&entity_id, &period),
            filing_id,
            dln,
            entity_id,
            period,
            organization_name,
            form_type,
            submitted_date,
            uploaded_timestamp,
            downloaded_timestamp,
            url,
        }
    }

    /// Parse one entry of an IRS index shard.
    ///
    /// `downloaded` is stamped onto the result as the time we observed it.
    pub fn from_index_entry(
        entry: &serde_json::Value,
        downloaded: DateTime<Utc>,
    ) -> Result<Self, FilingParseError> {
        let obj = entry.as_object().ok_or(FilingParseError::NotAnObject)?;

        let field = |name: &'static str| -> Result<String, FilingParseError> {
            match obj.get(name) {
                Some(serde_json::Value::String(s)) => Ok(s.trim().to_string()),
                Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
                Some(other) => Err(FilingParseError::InvalidValue {
                    field: name,
                    value: other.to_string(),
                }),
                None => Err(FilingParseError::MissingField(name)),
            }
        };

        let submitted_raw = field("SubmittedOn")?;
        let submitted_date = NaiveDate::parse_from_str(&submitted_raw, SUBMITTED_STORAGE_FORMAT)
            .map_err(|_| FilingParseError::InvalidValue {
                field: "SubmittedOn",
                value: submitted_raw.clone(),
            })?;

        let uploaded_raw = field("LastUpdated")?;
        let uploaded_timestamp =
            parse_uploaded(&uploaded_raw).ok_or(FilingParseError::InvalidValue {
                field: "LastUpdated",
                value: uploaded_raw.clone(),
            })?;

        Ok(Self::new(
            field("ObjectId")?,
            field("DLN")?,
            field("EIN")?,
            field("TaxPeriod")?,
            field("OrganizationName")?,
            field("FormType")?,
            submitted_date,
            uploaded_timestamp,
            downloaded,
            field("URL")?,
        ))
    }

    /// Blob store key of the raw XML document for this filing.
    pub fn content_key(&self) -> String {
        content_key_for(&self.filing_id)
    }

    /// Whether this filing should replace `other` for the same record.
    ///
    /// Later submission wins; equal submissions fall back to the later upload,
    /// and a complete tie goes to the larger filing id so the outcome never
    /// depends on the order filings are seen in.
    pub fn supersedes(&self, other: &FilingMetadata) -> bool {
        self.precedence(other) == Ordering::Greater
    }

    fn precedence(&self, other: &FilingMetadata) -> Ordering {
        self.submitted_date
            .cmp(&other.submitted_date)
            .then_with(|| self.uploaded_timestamp.cmp(&other.uploaded_timestamp))
            .then_with(|| self.filing_id.cmp(&other.filing_id))
    }
}

/// Blob store key of the raw XML document for a filing id.
pub fn content_key_for(filing_id: &str) -> String {
    format!("{}_public.xml", filing_id)
}

/// Parse an upload timestamp in any of the formats the indices have used.
pub fn parse_uploaded(raw: &str) -> Option<NaiveDateTime> {
    UPLOADED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
