//! Merge normalized filings into composites on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{ComposeError, ShardedPaths};
use crate::pipeline::{notify, run_phase, BatchError, NormalizedSet, Phase, TaskFailure};
use crate::update::UpdateEvent;

/// Writes composites, one concurrent task per entity.
pub struct CompositeWriter {
    paths: Arc<ShardedPaths>,
    workers: usize,
    timeout: Duration,
    events: Option<mpsc::Sender<UpdateEvent>>,
}

impl CompositeWriter {
    pub fn new(paths: ShardedPaths, workers: usize, timeout: Duration) -> Self {
        Self {
            paths: Arc::new(paths),
            workers,
            timeout,
            events: None,
        }
    }

    /// Report per-entity progress on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<UpdateEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn paths(&self) -> &ShardedPaths {
        &self.paths
    }

    /// Overlay each entity's updated periods onto its composite.
    ///
    /// Periods not present in `updates` are left untouched. Returns the
    /// number of composites written. Fails as a whole if any entity fails or
    /// the deadline expires; composites already written stay written.
    pub async fn write_all(&self, updates: NormalizedSet) -> Result<usize, BatchError> {
        if updates.is_empty() {
            return Ok(0);
        }

        notify(
            &self.events,
            UpdateEvent::PhaseStarted {
                phase: Phase::Write,
                total: updates.len(),
            },
        )
        .await;

        let tasks = updates
            .into_iter()
            .map(|(entity_id, periods)| {
                let paths = self.paths.clone();
                let events = self.events.clone();
                let item = entity_id.clone();

                let task = async move {
                    let path = paths
                        .path_for(&entity_id)
                        .map_err(|e| TaskFailure::compose(&entity_id, e))?;
                    merge_into(&path, periods)
                        .await
                        .map_err(|e| TaskFailure::compose(&entity_id, e))?;
                    notify(&events, UpdateEvent::CompositeWritten { entity_id }).await;
                    Ok::<_, TaskFailure>(())
                };
                (item, task)
            })
            .collect();

        let written = run_phase(Phase::Write, tasks, self.workers, self.timeout).await?;
        info!("Wrote {} composites", written.len());
        Ok(written.len())
    }

    /// Read an entity's composite. `Ok(None)` if it has never been written.
    pub async fn read(&self, entity_id: &str) -> Result<Option<Map<String, Value>>, ComposeError> {
        let path = self.paths.path_for(entity_id)?;
        read_composite(&path).await
    }
}

async fn read_composite(path: &Path) -> Result<Option<Map<String, Value>>, ComposeError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ComposeError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(ComposeError::NotAnObject(path.to_path_buf())),
        Err(source) => Err(ComposeError::Json {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn merge_into(
    path: &Path,
    periods: std::collections::BTreeMap<String, Value>,
) -> Result<(), ComposeError> {
    let io_err = |source| ComposeError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut composite = read_composite(path).await?.unwrap_or_default();
    for (period, content) in periods {
        composite.insert(period, content);
    }

    let body = serde_json::to_vec_pretty(&Value::Object(composite)).map_err(|source| {
        ComposeError::Json {
            path: path.to_path_buf(),
            source,
        }
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    // Write beside the target and rename so readers never see a partial file.
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &body).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

    debug!("Updated composite {}", path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn writer(base: &Path) -> CompositeWriter {
        CompositeWriter::new(
            ShardedPaths::new(base, 2).unwrap(),
            4,
            Duration::from_secs(10),
        )
    }

    fn updates(entity: &str, periods: &[(&str, Value)]) -> NormalizedSet {
        let mut set = NormalizedSet::new();
        set.insert(
            entity.to_string(),
            periods
                .iter()
                .map(|(p, v)| (p.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        );
        set
    }

    #[tokio::test]
    async fn test_composite_round_trip() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let first = json!({"Return": {"Total": "1"}});
        let second = json!({"Return": {"Total": "2"}});

        let written = w
            .write_all(updates(
                "943041314",
                &[("201012", first.clone()), ("201112", second.clone())],
            ))
            .await
            .unwrap();
        assert_eq!(written, 1);

        let composite = w.read("943041314").await.unwrap().unwrap();
        assert_eq!(composite.len(), 2);
        assert_eq!(composite["201012"], first);
        assert_eq!(composite["201112"], second);
        assert!(dir.path().join("943/041/943041314.json").is_file());
    }

    #[tokio::test]
    async fn test_partial_update_preserves_other_periods() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let first = json!({"Return": {"Total": "1"}});
        let revised = json!({"Return": {"Total": "20"}});

        w.write_all(updates(
            "943041314",
            &[("201012", first.clone()), ("201112", json!({"Return": {}}))],
        ))
        .await
        .unwrap();
        w.write_all(updates("943041314", &[("201112", revised.clone())]))
            .await
            .unwrap();

        let composite = w.read("943041314").await.unwrap().unwrap();
        assert_eq!(composite.len(), 2);
        assert_eq!(composite["201012"], first);
        assert_eq!(composite["201112"], revised);
    }

    #[tokio::test]
    async fn test_many_entities() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let mut set = NormalizedSet::new();
        for i in 0..20 {
            set.extend(updates(&format!("10000{:04}", i), &[("201012", json!(i))]));
        }

        assert_eq!(w.write_all(set).await.unwrap(), 20);
        assert_eq!(
            w.read("100000007").await.unwrap().unwrap()["201012"],
            json!(7)
        );
    }

    #[tokio::test]
    async fn test_read_missing_composite() {
        let dir = tempdir().unwrap();
        assert!(writer(dir.path()).read("943041314").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_entity_fails_batch() {
        let dir = tempdir().unwrap();
        let err = writer(dir.path())
            .write_all(updates("../x", &[("201012", json!({}))]))
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Write);
        assert_eq!(err.failures[0].item, "../x");
    }

    #[tokio::test]
    async fn test_corrupt_composite_is_reported() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let path = w.paths().path_for("943041314").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(matches!(
            w.read("943041314").await,
            Err(ComposeError::NotAnObject(_))
        ));
    }
}
