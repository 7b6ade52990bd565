//! Yearly e-file index shards published in the bucket.
//!
//! The IRS publishes one `index_<year>.json` per filing year, starting with
//! 2011. Each shard is a JSON object with a single key `Filings<year>` whose
//! value is the list of index entries for that year.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::models::{FilingMetadata, FilingParseError};
use crate::store::{BlobStore, StoreError};

/// First year the IRS published e-file indices for.
pub const EARLIEST_YEAR: i32 = 2011;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Required index shard is missing: {key}")]
    MissingShard { key: String },
    #[error("Index invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Malformed index shard {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Bad entry in index for {year}: {source}")]
    Entry {
        year: i32,
        #[source]
        source: FilingParseError,
    },
    #[error("Index task failed: {0}")]
    Task(String),
}

/// Bucket key of the index shard for a year.
pub fn index_key(year: i32) -> String {
    format!("index_{}.json", year)
}

/// All filings listed in one yearly shard.
#[derive(Debug, Clone)]
pub struct IndexShard {
    pub year: i32,
    pub filings: Vec<FilingMetadata>,
}

/// Reads the yearly index shards from a bucket.
#[derive(Clone)]
pub struct IndexSource {
    store: Arc<dyn BlobStore>,
    earliest_year: i32,
    latest_year: i32,
}

impl IndexSource {
    /// Source covering `EARLIEST_YEAR` through the current year.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            earliest_year: EARLIEST_YEAR,
            latest_year: Utc::now().year(),
        }
    }

    pub fn with_years(mut self, earliest: i32, latest: Option<i32>) -> Self {
        self.earliest_year = earliest;
        if let Some(latest) = latest {
            self.latest_year = latest;
        }
        self
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.earliest_year..=self.latest_year
    }

    /// Confirm the bucket starts exactly at the expected year.
    ///
    /// A shard for the year before means older filings appeared that this
    /// tool does not know to scan; a missing first shard means the bucket is
    /// not what we think it is.
    pub async fn verify(&self) -> Result<(), SourceError> {
        let before = index_key(self.earliest_year - 1);
        if self.store.exists(&before).await? {
            return Err(SourceError::InvariantViolation(format!(
                "unexpected index shard {} before earliest year {}",
                before, self.earliest_year
            )));
        }

        let first = index_key(self.earliest_year);
        if !self.store.exists(&first).await? {
            return Err(SourceError::MissingShard { key: first });
        }

        Ok(())
    }

    /// Verify the bucket, then fetch every shard concurrently.
    ///
    /// Shards are delivered in completion order. Unpublished years are
    /// skipped. After the first error nothing further is sent; dropping the
    /// receiver aborts outstanding fetches.
    pub async fn stream(
        &self,
    ) -> Result<mpsc::Receiver<Result<IndexShard, SourceError>>, SourceError> {
        self.verify().await?;
        info!(
            "Scanning e-file indices {}-{} in {}",
            self.earliest_year,
            self.latest_year,
            self.store.location()
        );

        let (tx, rx) = mpsc::channel(4);
        let store = self.store.clone();
        let years = self.years();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for year in years {
                tasks.spawn(fetch_shard(store.clone(), year));
            }

            while let Some(joined) = tasks.join_next().await {
                let result = match joined {
                    Ok(Ok(Some(shard))) => Ok(shard),
                    Ok(Ok(None)) => continue,
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(SourceError::Task(e.to_string())),
                };
                let failed = result.is_err();
                if tx.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

async fn fetch_shard(store: Arc<dyn BlobStore>, year: i32) -> Result<Option<IndexShard>, SourceError> {
    let key = index_key(year);
    let raw = match store.get(&key).await {
        Ok(raw) => raw,
        Err(e) if e.is_not_found() => {
            debug!("Index shard {} not published", key);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let downloaded = Utc::now();

    // Shards run to hundreds of megabytes; parse off the async workers.
    let shard = tokio::task::spawn_blocking(move || parse_shard(&key, year, &raw, downloaded))
        .await
        .map_err(|e| SourceError::Task(e.to_string()))??;

    info!(
        "Loaded {} filings from index for {}",
        shard.filings.len(),
        year
    );
    Ok(Some(shard))
}

fn parse_shard(
    key: &str,
    year: i32,
    raw: &[u8],
    downloaded: chrono::DateTime<Utc>,
) -> Result<IndexShard, SourceError> {
    let json: serde_json::Value =
        serde_json::from_slice(raw).map_err(|source| SourceError::Json {
            key: key.to_string(),
            source,
        })?;

    let list_key = format!("Filings{}", year);
    let entries = match json.as_object() {
        Some(obj) if obj.len() == 1 => obj.get(&list_key).and_then(|v| v.as_array()),
        _ => None,
    }
    .ok_or_else(|| {
        SourceError::InvariantViolation(format!(
            "{} must contain exactly one key '{}' holding a list",
            key, list_key
        ))
    })?;

    let filings = entries
        .iter()
        .map(|entry| {
            FilingMetadata::from_index_entry(entry, downloaded)
                .map_err(|source| SourceError::Entry { year, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IndexShard { year, filings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalBucket;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(id: &str, ein: &str) -> serde_json::Value {
        json!({
            "EIN": ein,
            "TaxPeriod": "201012",
            "DLN": "93493091004121",
            "FormType": "990",
            "URL": format!("https://s3.amazonaws.com/irs-form-990/{}_public.xml", id),
            "OrganizationName": "TEST ORG",
            "SubmittedOn": "2011-09-28",
            "ObjectId": id,
            "LastUpdated": "2016-03-21T17:23:53"
        })
    }

    fn write_shard(dir: &std::path::Path, year: i32, body: serde_json::Value) {
        std::fs::write(dir.join(index_key(year)), body.to_string()).unwrap();
    }

    fn source(dir: &std::path::Path, latest: i32) -> IndexSource {
        IndexSource::new(Arc::new(LocalBucket::new(dir))).with_years(2011, Some(latest))
    }

    #[tokio::test]
    async fn test_stream_skips_unpublished_years() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 2011, json!({"Filings2011": [entry("1", "111")]}));
        write_shard(
            dir.path(),
            2013,
            json!({"Filings2013": [entry("2", "222"), entry("3", "333")]}),
        );

        let mut rx = source(dir.path(), 2014).stream().await.unwrap();
        let mut years = Vec::new();
        let mut total = 0;
        while let Some(shard) = rx.recv().await {
            let shard = shard.unwrap();
            total += shard.filings.len();
            years.push(shard.year);
        }
        years.sort();

        assert_eq!(years, vec![2011, 2013]);
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_verify_requires_first_year() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 2012, json!({"Filings2012": []}));

        let err = source(dir.path(), 2012).verify().await.unwrap_err();
        assert!(matches!(err, SourceError::MissingShard { .. }));
    }

    #[tokio::test]
    async fn test_verify_rejects_earlier_year() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 2010, json!({"Filings2010": []}));
        write_shard(dir.path(), 2011, json!({"Filings2011": []}));

        let err = source(dir.path(), 2011).verify().await.unwrap_err();
        assert!(matches!(err, SourceError::InvariantViolation(_)));
    }

    #[test]
    fn test_parse_shard_shape() {
        let ok = json!({"Filings2011": [entry("1", "111")]}).to_string();
        let shard = parse_shard("index_2011.json", 2011, ok.as_bytes(), Utc::now()).unwrap();
        assert_eq!(shard.filings[0].record_id, "111_201012");

        for bad in [
            json!({"Filings2011": [], "Other": []}),
            json!({"Filings2012": []}),
            json!({"Filings2011": {}}),
            json!([]),
        ] {
            let raw = bad.to_string();
            assert!(matches!(
                parse_shard("index_2011.json", 2011, raw.as_bytes(), Utc::now()),
                Err(SourceError::InvariantViolation(_))
            ));
        }
    }

    #[test]
    fn test_parse_shard_bad_entry() {
        let raw = json!({"Filings2011": [{"EIN": "1"}]}).to_string();
        assert!(matches!(
            parse_shard("index_2011.json", 2011, raw.as_bytes(), Utc::now()),
            Err(SourceError::Entry { year: 2011, .. })
        ));
    }
}
