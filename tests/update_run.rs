//! End-to-end update runs against a local bucket mirror.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

use composer::config::Settings;
use composer::pipeline::{ErrorKind, Phase};
use composer::update::{UpdateError, UpdateRun};

struct Fixture {
    _root: TempDir,
    bucket: PathBuf,
    data: PathBuf,
    staging: PathBuf,
    shards: Vec<(i32, Vec<Value>)>,
}

impl Fixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        let bucket = root.path().join("bucket");
        let data = root.path().join("data");
        let staging = root.path().join("staging");
        for dir in [&bucket, &staging] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self {
            _root: root,
            bucket,
            data,
            staging,
            shards: vec![(2011, Vec::new()), (2012, Vec::new())],
        }
    }

    /// List a filing in a year's index and, if `total` is given, publish its document.
    fn publish(
        &mut self,
        year: i32,
        object_id: &str,
        ein: &str,
        submitted: &str,
        total: Option<&str>,
    ) {
        let entry = json!({
            "EIN": ein,
            "TaxPeriod": "201012",
            "DLN": format!("9349309{}", object_id),
            "FormType": "990",
            "URL": format!("https://s3.amazonaws.com/irs-form-990/{}_public.xml", object_id),
            "OrganizationName": format!("ORG {}", ein),
            "SubmittedOn": submitted,
            "ObjectId": object_id,
            "LastUpdated": "2016-03-21T17:23:53"
        });
        if let Some((_, entries)) = self.shards.iter_mut().find(|(y, _)| *y == year) {
            entries.push(entry);
        }
        if let Some(total) = total {
            self.write_document(object_id, total);
        }
        self.write_shards();
    }

    fn write_document(&self, object_id: &str, total: &str) {
        let xml = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <Return xmlns="http://www.irs.gov/efile" returnVersion="2010v3.2">
              <ReturnData><IRS990><TotalRevenue>{}</TotalRevenue></IRS990></ReturnData>
            </Return>"#,
            total
        );
        std::fs::write(self.bucket.join(format!("{}_public.xml", object_id)), xml).unwrap();
    }

    fn write_shards(&self) {
        for (year, entries) in &self.shards {
            let body = json!({ format!("Filings{}", year): entries });
            std::fs::write(
                self.bucket.join(format!("index_{}.json", year)),
                body.to_string(),
            )
            .unwrap();
        }
    }

    fn settings(&self) -> Settings {
        let mut settings = Settings::with_data_dir(self.data.clone());
        settings.bucket = self.bucket.display().to_string();
        settings.latest_year = Some(2012);
        settings.workers = 2;
        settings.staging_dir = Some(self.staging.clone());
        settings
    }

    fn composite(&self, ein: &str) -> Option<Value> {
        let path = self
            .data
            .join(&ein[0..3])
            .join(&ein[3..6])
            .join(format!("{}.json", ein));
        std::fs::read(path)
            .ok()
            .map(|raw| serde_json::from_slice(&raw).unwrap())
    }

    fn db(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.data.join("state.sqlite")).unwrap()
    }

    fn count(&self, table: &str) -> i64 {
        self.db()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    fn latest_filing_id(&self, record_id: &str) -> Option<String> {
        self.db()
            .query_row(
                "SELECT irs_efile_id FROM latest_filings WHERE record_id = ?1",
                [record_id],
                |row| row.get(0),
            )
            .ok()
    }
}

fn total_revenue(composite: &Value, period: &str) -> Value {
    composite[period]["Return"]["ReturnData"]["IRS990"]["TotalRevenue"].clone()
}

fn staging_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_first_run_builds_composites_and_commits() {
    let mut fx = Fixture::new();
    fx.publish(2011, "201100001", "111111111", "2011-05-01", Some("100"));
    fx.publish(2011, "201100002", "222222222", "2011-06-01", Some("200"));
    fx.publish(2012, "201200003", "111111111", "2012-02-01", Some("150"));

    let report = UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.changed_entities, 2);
    assert_eq!(report.changed_filings, 2);
    assert_eq!(report.staged_duplicates, 1);
    assert_eq!(report.composites_written, 2);

    let amended = fx.composite("111111111").unwrap();
    assert_eq!(total_revenue(&amended, "201012"), json!("150"));
    assert_eq!(amended["201012"]["Return@returnVersion"], json!("2010v3.2"));
    assert_eq!(
        total_revenue(&fx.composite("222222222").unwrap(), "201012"),
        json!("200")
    );

    assert_eq!(fx.count("latest_filings"), 2);
    assert_eq!(fx.count("duplicates"), 1);
    assert_eq!(
        fx.latest_filing_id("111111111_201012").as_deref(),
        Some("201200003")
    );
    assert!(staging_is_empty(&fx.staging));
}

#[tokio::test]
async fn test_second_run_without_changes_is_a_no_op() {
    let mut fx = Fixture::new();
    fx.publish(2011, "201100001", "111111111", "2011-05-01", Some("100"));

    UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();
    let before = std::fs::read(fx.data.join("111/111/111111111.json")).unwrap();

    let report = UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.changed_filings, 0);
    assert_eq!(report.composites_written, 0);
    assert_eq!(
        std::fs::read(fx.data.join("111/111/111111111.json")).unwrap(),
        before
    );
    assert_eq!(fx.count("latest_filings"), 1);
    assert_eq!(fx.count("duplicates"), 0);
}

#[tokio::test]
async fn test_amendment_in_later_run_replaces_period() {
    let mut fx = Fixture::new();
    fx.publish(2011, "201100001", "111111111", "2011-05-01", Some("100"));
    UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();

    fx.publish(2012, "201200003", "111111111", "2012-02-01", Some("150"));
    let report = UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.changed_filings, 1);
    assert_eq!(report.staged_duplicates, 1);
    assert_eq!(
        total_revenue(&fx.composite("111111111").unwrap(), "201012"),
        json!("150")
    );
    assert_eq!(
        fx.latest_filing_id("111111111_201012").as_deref(),
        Some("201200003")
    );
    assert_eq!(fx.count("duplicates"), 1);
}

#[tokio::test]
async fn test_failed_fetch_leaves_index_uncommitted() {
    let mut fx = Fixture::new();
    fx.publish(2011, "201100001", "111111111", "2011-05-01", Some("100"));
    UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();

    // Listed in the index, but the document has not been published.
    fx.publish(2012, "201200004", "333333333", "2012-03-01", None);
    let err = UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    match err {
        UpdateError::Batch(batch) => {
            assert_eq!(batch.phase, Phase::Fetch);
            assert_eq!(batch.failures[0].item, "201200004");
            assert_eq!(batch.failures[0].kind, ErrorKind::NotFound);
        }
        other => panic!("expected batch failure, got {other}"),
    }
    assert_eq!(fx.count("latest_filings"), 1);
    assert!(fx.latest_filing_id("333333333_201012").is_none());
    assert!(fx.composite("333333333").is_none());

    // Once the document appears the same run succeeds.
    fx.write_document("201200004", "300");
    let report = UpdateRun::from_settings(&fx.settings())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.changed_filings, 1);
    assert_eq!(
        total_revenue(&fx.composite("333333333").unwrap(), "201012"),
        json!("300")
    );
    assert_eq!(fx.count("latest_filings"), 2);
}

#[tokio::test]
async fn test_missing_first_index_fails_before_any_write() {
    let fx = Fixture::new();
    let mut settings = fx.settings();
    settings.earliest_year = 2013;
    settings.latest_year = Some(2014);

    let err = UpdateRun::from_settings(&settings)
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::Source(_)));
}
