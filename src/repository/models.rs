//! Diesel ORM models for the filing tables.
//!
//! `latest_filings` and `duplicates` share a column layout and differ only in
//! their primary key, so one record type serves both.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use super::pool::DbError;
use crate::models::{
    parse_uploaded, FilingMetadata, SUBMITTED_STORAGE_FORMAT, UPLOADED_STORAGE_FORMAT,
};

/// Filing row from either table, in column order.
#[derive(Queryable, Debug, Clone, PartialEq, Eq)]
pub struct FilingRecord {
    pub record_id: String,
    pub irs_efile_id: String,
    pub irs_dln: String,
    pub ein: String,
    pub period: String,
    pub name_org: String,
    pub form_type: String,
    pub date_submitted: String,
    pub date_uploaded: String,
    pub date_downloaded: String,
    pub url: String,
}

impl From<&FilingMetadata> for FilingRecord {
    fn from(filing: &FilingMetadata) -> Self {
        Self {
            record_id: filing.record_id.clone(),
            irs_efile_id: filing.filing_id.clone(),
            irs_dln: filing.dln.clone(),
            ein: filing.entity_id.clone(),
            period: filing.period.clone(),
            name_org: filing.organization_name.clone(),
            form_type: filing.form_type.clone(),
            date_submitted: filing
                .submitted_date
                .format(SUBMITTED_STORAGE_FORMAT)
                .to_string(),
            date_uploaded: filing
                .uploaded_timestamp
                .format(UPLOADED_STORAGE_FORMAT)
                .to_string(),
            date_downloaded: filing.downloaded_timestamp.to_rfc3339(),
            url: filing.url.clone(),
        }
    }
}

impl TryFrom<FilingRecord> for FilingMetadata {
    type Error = DbError;

    fn try_from(record: FilingRecord) -> Result<Self, Self::Error> {
        let corrupt = |column: &str, value: &str| {
            DbError::DeserializationError(
                format!(
                    "filing {} has unreadable {} '{}'",
                    record.irs_efile_id, column, value
                )
                .into(),
            )
        };

        let submitted_date =
            NaiveDate::parse_from_str(&record.date_submitted, SUBMITTED_STORAGE_FORMAT)
                .map_err(|_| corrupt("date_submitted", &record.date_submitted))?;
        let uploaded_timestamp = parse_uploaded(&record.date_uploaded)
            .ok_or_else(|| corrupt("date_uploaded", &record.date_uploaded))?;
        let downloaded_timestamp = DateTime::parse_from_rfc3339(&record.date_downloaded)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| corrupt("date_downloaded", &record.date_downloaded))?;

        Ok(FilingMetadata {
            record_id: record.record_id,
            filing_id: record.irs_efile_id,
            dln: record.irs_dln,
            entity_id: record.ein,
            period: record.period,
            organization_name: record.name_org,
            form_type: record.form_type,
            submitted_date,
            uploaded_timestamp,
            downloaded_timestamp,
            url: record.url,
        })
    }
}
