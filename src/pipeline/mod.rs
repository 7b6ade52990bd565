//! Retrieval of changed filings: fetch raw documents, then normalize them.
//!
//! Retrieval runs as two bounded phases. Phase 1 fetches every changed
//! filing's document into a staging directory; phase 2 starts only after
//! phase 1 has fully drained and translates each staged document. Each phase
//! has its own deadline and fails as a whole.

mod error;
mod phase;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::info;

pub use error::{BatchError, ErrorKind, Phase, TaskFailure};
pub(crate) use phase::run_phase;

use crate::index::ChangeSet;
use crate::models::FilingMetadata;
use crate::store::BlobStore;
use crate::translate::Translator;
use crate::update::UpdateEvent;

/// Normalized content per entity and period.
pub type NormalizedSet = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum tasks in flight per phase.
    pub workers: usize,
    /// Deadline for the whole fetch phase.
    pub fetch_timeout: Duration,
    /// Deadline for the whole translate phase.
    pub translate_timeout: Duration,
    /// Leave the staging directory on disk when the pipeline is dropped.
    pub keep_staging: bool,
    /// Parent of the staging directory; the system temp dir if unset.
    pub staging_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            fetch_timeout: Duration::from_secs(3600),
            translate_timeout: Duration::from_secs(3600),
            keep_staging: false,
            staging_root: None,
        }
    }
}

/// Fetches and translates the filings in a change set.
pub struct RetrievalPipeline {
    store: Arc<dyn BlobStore>,
    translator: Arc<dyn Translator>,
    config: PipelineConfig,
    staging: Option<TempDir>,
    staging_path: PathBuf,
    events: Option<mpsc::Sender<UpdateEvent>>,
}

impl RetrievalPipeline {
    /// Create a pipeline and its staging directory.
    pub fn new(
        store: Arc<dyn BlobStore>,
        translator: Arc<dyn Translator>,
        config: PipelineConfig,
    ) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("composer-staging-");
        let staging = match &config.staging_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let staging_path = staging.path().to_path_buf();

        Ok(Self {
            store,
            translator,
            config,
            staging: Some(staging),
            staging_path,
            events: None,
        })
    }

    /// Report per-filing progress on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<UpdateEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Directory holding fetched documents.
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Fetch and normalize every filing referenced by `changes`.
    ///
    /// The result has the same entity/period shape as `changes`.
    pub async fn retrieve(&self, changes: &ChangeSet) -> Result<NormalizedSet, BatchError> {
        let filings: Vec<&FilingMetadata> = changes
            .values()
            .flat_map(|periods| periods.values())
            .collect();
        if filings.is_empty() {
            return Ok(NormalizedSet::new());
        }

        info!(
            "Retrieving {} filings for {} organizations",
            filings.len(),
            changes.len()
        );

        let staged = self.fetch_phase(&filings).await?;
        let mut translated = self.translate_phase(staged).await?;

        let mut normalized = NormalizedSet::new();
        for (entity_id, periods) in changes {
            for (period, filing) in periods {
                let content = translated.remove(&filing.filing_id).ok_or_else(|| BatchError {
                    phase: Phase::Translate,
                    failures: vec![TaskFailure::new(
                        filing.filing_id.as_str(),
                        ErrorKind::InvariantViolation,
                        "filing missing from translated batch",
                    )],
                    timed_out: false,
                })?;
                normalized
                    .entry(entity_id.clone())
                    .or_default()
                    .insert(period.clone(), content);
            }
        }

        Ok(normalized)
    }

    async fn fetch_phase(
        &self,
        filings: &[&FilingMetadata],
    ) -> Result<Vec<(String, PathBuf)>, BatchError> {
        notify(
            &self.events,
            UpdateEvent::PhaseStarted {
                phase: Phase::Fetch,
                total: filings.len(),
            },
        )
        .await;

        let tasks = filings
            .iter()
            .map(|filing| {
                let store = self.store.clone();
                let events = self.events.clone();
                let filing_id = filing.filing_id.clone();
                let key = filing.content_key();
                let path = staging_file(&self.staging_path, &filing.filing_id);

                let task = async move {
                    let path = path?;
                    let raw = store
                        .get(&key)
                        .await
                        .map_err(|e| TaskFailure::store(&filing_id, e))?;
                    tokio::fs::write(&path, &raw)
                        .await
                        .map_err(|e| TaskFailure::io(&filing_id, e))?;
                    notify(&events, UpdateEvent::Fetched { filing_id }).await;
                    Ok::<_, TaskFailure>(path)
                };
                (filing.filing_id.clone(), task)
            })
            .collect();

        run_phase(Phase::Fetch, tasks, self.config.workers, self.config.fetch_timeout).await
    }

    async fn translate_phase(
        &self,
        staged: Vec<(String, PathBuf)>,
    ) -> Result<HashMap<String, serde_json::Value>, BatchError> {
        notify(
            &self.events,
            UpdateEvent::PhaseStarted {
                phase: Phase::Translate,
                total: staged.len(),
            },
        )
        .await;

        let tasks = staged
            .into_iter()
            .map(|(filing_id, path)| {
                let translator = self.translator.clone();
                let events = self.events.clone();
                let item = filing_id.clone();

                let task = async move {
                    let raw = tokio::fs::read(&path)
                        .await
                        .map_err(|e| TaskFailure::io(&filing_id, e))?;
                    let content = tokio::task::spawn_blocking(move || translator.translate(&raw))
                        .await
                        .map_err(|e| {
                            TaskFailure::new(
                                filing_id.as_str(),
                                ErrorKind::Conversion,
                                e.to_string(),
                            )
                        })?
                        .map_err(|e| TaskFailure::translate(&filing_id, e))?;
                    notify(&events, UpdateEvent::Translated { filing_id }).await;
                    Ok::<_, TaskFailure>(content)
                };
                (item, task)
            })
            .collect();

        let translated = run_phase(
            Phase::Translate,
            tasks,
            self.config.workers,
            self.config.translate_timeout,
        )
        .await?;

        Ok(translated.into_iter().collect())
    }
}

impl Drop for RetrievalPipeline {
    fn drop(&mut self) {
        if !self.config.keep_staging {
            return;
        }
        if let Some(staging) = self.staging.take() {
            let path = staging.into_path();
            info!("Keeping staging directory {}", path.display());
        }
    }
}

/// Staging path for a filing's document. Ids come from the remote index, so
/// anything that is not plain alphanumeric is refused.
fn staging_file(staging: &Path, filing_id: &str) -> Result<PathBuf, TaskFailure> {
    if filing_id.is_empty() || !filing_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TaskFailure::new(
            filing_id,
            ErrorKind::InvariantViolation,
            "filing id is not alphanumeric",
        ));
    }
    Ok(staging.join(format!("{}.xml", filing_id)))
}

pub(crate) async fn notify(events: &Option<mpsc::Sender<UpdateEvent>>, event: UpdateEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
