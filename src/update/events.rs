//! Progress events emitted during an update run.

use crate::pipeline::Phase;

/// Events for progress tracking.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// An index shard has been parsed.
    ShardLoaded { year: i32, filings: usize },
    /// Periodic scan progress.
    Scanned { count: usize },
    /// Scan finished; `changed` filings will be retrieved.
    ScanFinished {
        scanned: usize,
        changed: usize,
        duplicates: usize,
    },
    /// A batch phase is starting.
    PhaseStarted { phase: Phase, total: usize },
    Fetched { filing_id: String },
    Translated { filing_id: String },
    CompositeWritten { entity_id: String },
    /// Index state has been committed.
    Committed { latest: usize, duplicates: usize },
}
