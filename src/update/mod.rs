//! One incremental e-file update run.
//!
//! scan indices → diff → retrieve → compose → commit. The index is only
//! committed once every earlier step has succeeded, so a failed run can be
//! repeated against the same remote state without side effects beyond
//! rewriting the same composites.

mod events;
mod timer;

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use events::UpdateEvent;
pub use timer::ScanTimer;

use crate::compose::{ComposeError, CompositeWriter};
use crate::config::Settings;
use crate::index::{FilingIndex, IndexError};
use crate::pipeline::{notify, BatchError, RetrievalPipeline};
use crate::repository::{DbContext, DbError};
use crate::sources::{IndexSource, SourceError};
use crate::store::{open_bucket, StoreError};
use crate::translate::{Translator, XmlJsonTranslator};

/// Filings between scan progress lines.
const SCAN_LOG_CHUNK: usize = 1000;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("Index scan failed: {0}")]
    Source(#[from] SourceError),
    #[error("Bucket error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("Composite error: {0}")]
    Compose(#[from] ComposeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counts describing a completed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    /// Index entries read.
    pub scanned: usize,
    /// Organizations with at least one new latest filing.
    pub changed_entities: usize,
    /// New latest filings.
    pub changed_filings: usize,
    /// Filings newly recorded as superseded.
    pub staged_duplicates: usize,
    pub composites_written: usize,
}

/// Sequences one incremental update.
pub struct UpdateRun {
    ctx: DbContext,
    source: IndexSource,
    pipeline: RetrievalPipeline,
    writer: CompositeWriter,
    events: Option<mpsc::Sender<UpdateEvent>>,
}

impl UpdateRun {
    pub fn new(
        ctx: DbContext,
        source: IndexSource,
        pipeline: RetrievalPipeline,
        writer: CompositeWriter,
    ) -> Self {
        Self {
            ctx,
            source,
            pipeline,
            writer,
            events: None,
        }
    }

    /// Build a run from resolved settings with the default XML translator.
    pub fn from_settings(settings: &Settings) -> Result<Self, UpdateError> {
        Self::with_translator(settings, Arc::new(XmlJsonTranslator::new()))
    }

    pub fn with_translator(
        settings: &Settings,
        translator: Arc<dyn Translator>,
    ) -> Result<Self, UpdateError> {
        settings.ensure_directories()?;

        let store = open_bucket(
            &settings.bucket,
            settings.request_timeout(),
            &settings.user_agent,
        )?;
        let source = IndexSource::new(store.clone())
            .with_years(settings.earliest_year, settings.latest_year);
        let pipeline = RetrievalPipeline::new(store, translator, settings.pipeline_config())?;
        let writer = settings.composite_writer()?;

        Ok(Self::new(
            settings.create_db_context(),
            source,
            pipeline,
            writer,
        ))
    }

    /// Report progress on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<UpdateEvent>) -> Self {
        self.pipeline = self.pipeline.with_events(tx.clone());
        self.writer = self.writer.with_events(tx.clone());
        self.events = Some(tx);
        self
    }

    /// Perform the run.
    pub async fn run(self) -> Result<UpdateReport, UpdateError> {
        self.ctx.init_schema().await?;
        let mut index = FilingIndex::open(&self.ctx);

        let scanned = self.scan(&mut index).await?;
        let mut report = UpdateReport {
            scanned,
            changed_entities: index.changes().len(),
            changed_filings: index.staged_change_count(),
            staged_duplicates: index.staged_dupes().len(),
            composites_written: 0,
        };

        notify(
            &self.events,
            UpdateEvent::ScanFinished {
                scanned,
                changed: report.changed_filings,
                duplicates: report.staged_duplicates,
            },
        )
        .await;
        info!(
            "Scan found {} new filings for {} organizations, {} superseded",
            report.changed_filings, report.changed_entities, report.staged_duplicates
        );

        if report.changed_filings > 0 {
            let normalized = self.pipeline.retrieve(index.changes()).await.map_err(|e| {
                warn!("Retrieval failed; index left uncommitted");
                e
            })?;
            report.composites_written = self.writer.write_all(normalized).await.map_err(|e| {
                warn!("Composite write failed; index left uncommitted");
                e
            })?;
        }

        if index.has_staged() {
            let summary = index.commit().await?;
            notify(
                &self.events,
                UpdateEvent::Committed {
                    latest: summary.latest_written,
                    duplicates: summary.duplicates_written,
                },
            )
            .await;
            info!(
                "Committed {} latest filings and {} duplicates",
                summary.latest_written, summary.duplicates_written
            );
        }

        Ok(report)
    }

    /// Feed every published index entry into the index, one at a time.
    async fn scan(&self, index: &mut FilingIndex) -> Result<usize, UpdateError> {
        let mut shards = self.source.stream().await?;
        let mut timer = ScanTimer::new(SCAN_LOG_CHUNK);

        while let Some(shard) = shards.recv().await {
            let shard = shard?;
            notify(
                &self.events,
                UpdateEvent::ShardLoaded {
                    year: shard.year,
                    filings: shard.filings.len(),
                },
            )
            .await;

            for filing in shard.filings {
                let started = Instant::now();
                index.add(filing).await?;
                if timer.record(started.elapsed()) {
                    notify(
                        &self.events,
                        UpdateEvent::Scanned {
                            count: timer.count(),
                        },
                    )
                    .await;
                }
            }
        }

        timer.finish();
        Ok(timer.count())
    }
}
