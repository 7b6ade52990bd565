//! Incremental index of latest and superseded e-filings.
//!
//! Filings observed during a scan are staged in memory: the winning filing per
//! (EIN, period) slot in `staged_changes`, losers in `staged_dupes`. Nothing
//! reaches the database until [`FilingIndex::commit`], which the update run
//! only calls once every downstream phase has succeeded.
//!
//! Re-adding a filing that is already committed (as latest or as a duplicate)
//! is a no-op, so scanning the same remote index twice is harmless.

mod error;

use std::collections::BTreeMap;

use diesel_async::AsyncConnection;
use tracing::debug;

pub use error::IndexError;

use crate::models::FilingMetadata;
use crate::repository::{DbContext, DbError, FilingKey, FilingTable, SqliteConn, SqlitePool};

/// Staged changes: EIN → period → winning filing.
pub type ChangeSet = BTreeMap<String, BTreeMap<String, FilingMetadata>>;

/// Counts written by a commit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub latest_written: usize,
    pub duplicates_written: usize,
}

/// Staged dedup engine over the `latest_filings` and `duplicates` tables.
///
/// Not safe for concurrent mutation: a single scan loop calls [`add`](Self::add),
/// then [`commit`](Self::commit) runs once. One connection is opened on first
/// use and held for the life of the index.
pub struct FilingIndex {
    latest: FilingTable,
    duplicates: FilingTable,
    conn: Option<SqliteConn>,
    staged_changes: ChangeSet,
    staged_dupes: BTreeMap<String, FilingMetadata>,
}

impl FilingIndex {
    pub fn new(latest: FilingTable, duplicates: FilingTable) -> Self {
        Self {
            latest,
            duplicates,
            conn: None,
            staged_changes: BTreeMap::new(),
            staged_dupes: BTreeMap::new(),
        }
    }

    /// Open the index over a database context.
    pub fn open(ctx: &DbContext) -> Self {
        Self::new(ctx.latest(), ctx.duplicates())
    }

    /// Stage a filing.
    ///
    /// A filing already committed as a duplicate is ignored. Otherwise it is
    /// resolved against whatever is staged for its (EIN, period) slot, or
    /// failing that against the committed latest filing for its record. The
    /// loser of the comparison is staged as a duplicate.
    pub async fn add(&mut self, filing: FilingMetadata) -> Result<(), IndexError> {
        if self.staged_dupes.contains_key(&filing.filing_id) {
            return Ok(());
        }

        let conn = connection(&mut self.conn, self.latest.pool()).await?;

        if self
            .duplicates
            .unique_by_key_on(conn, FilingKey::FilingId, &filing.filing_id)
            .await?
            .is_some()
        {
            debug!("Filing {} already recorded as duplicate", filing.filing_id);
            return Ok(());
        }

        let staged = self
            .staged_changes
            .get(&filing.entity_id)
            .and_then(|periods| periods.get(&filing.period))
            .cloned();

        if let Some(staged) = staged {
            if staged.filing_id != filing.filing_id {
                self.resolve(filing, staged);
            }
            return Ok(());
        }

        match self
            .latest
            .unique_by_key_on(conn, FilingKey::RecordId, &filing.record_id)
            .await?
        {
            Some(existing) if existing.filing_id == filing.filing_id => {}
            Some(existing) => self.resolve(filing, existing),
            None => self.stage_change(filing),
        }

        Ok(())
    }

    /// Flush staged state to the database and clear it.
    ///
    /// Inside one transaction, duplicates are written first (removed from
    /// `latest_filings` if present, then upserted into `duplicates`), then
    /// every staged change is upserted into `latest_filings`. On error nothing
    /// is written and the staged state is kept so the commit can be retried.
    pub async fn commit(&mut self) -> Result<CommitSummary, IndexError> {
        let conn = connection(&mut self.conn, self.latest.pool()).await?;
        let latest = &self.latest;
        let duplicates = &self.duplicates;
        let dupes = &self.staged_dupes;
        let changes = &self.staged_changes;

        let summary = conn
            .transaction::<_, IndexError, _>(|conn| {
                Box::pin(async move {
                    let mut summary = CommitSummary::default();

                    for dupe in dupes.values() {
                        latest.delete_if_exists_on(conn, &dupe.filing_id).await?;
                        duplicates.upsert_on(conn, dupe).await?;
                        summary.duplicates_written += 1;
                    }

                    for filing in changes.values().flat_map(|periods| periods.values()) {
                        latest.upsert_on(conn, filing).await?;
                        summary.latest_written += 1;
                    }

                    Ok(summary)
                })
            })
            .await?;

        self.reset();
        Ok(summary)
    }

    /// Drop all staged state without writing it.
    pub fn reset(&mut self) {
        self.staged_changes.clear();
        self.staged_dupes.clear();
    }

    /// Distinct EINs in the committed latest table.
    pub async fn eins(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.latest.distinct_entity_ids().await?)
    }

    /// Staged changes since the last commit.
    pub fn changes(&self) -> &ChangeSet {
        &self.staged_changes
    }

    /// Staged duplicates since the last commit, keyed by filing id.
    pub fn staged_dupes(&self) -> &BTreeMap<String, FilingMetadata> {
        &self.staged_dupes
    }

    /// Whether anything is waiting to be committed.
    pub fn has_staged(&self) -> bool {
        !self.staged_changes.is_empty() || !self.staged_dupes.is_empty()
    }

    /// Number of staged filings across all entities.
    pub fn staged_change_count(&self) -> usize {
        self.staged_changes.values().map(|periods| periods.len()).sum()
    }

    /// Committed latest filings for an EIN, one per period.
    pub async fn filings(&self, entity_id: &str) -> Result<Vec<FilingMetadata>, IndexError> {
        Ok(self.latest.by_key(FilingKey::EntityId, entity_id).await?)
    }

    /// Committed filings that have been superseded.
    pub async fn duplicates(&self) -> Result<Vec<FilingMetadata>, IndexError> {
        Ok(self.duplicates.all().await?)
    }

    fn resolve(&mut self, incoming: FilingMetadata, current: FilingMetadata) {
        if incoming.supersedes(&current) {
            debug!(
                "Filing {} supersedes {} for {}",
                incoming.filing_id, current.filing_id, incoming.record_id
            );
            self.staged_dupes.insert(current.filing_id.clone(), current);
            self.stage_change(incoming);
        } else {
            debug!(
                "Filing {} superseded by {} for {}",
                incoming.filing_id, current.filing_id, incoming.record_id
            );
            self.staged_dupes.insert(incoming.filing_id.clone(), incoming);
        }
    }

    fn stage_change(&mut self, filing: FilingMetadata) {
        self.staged_dupes.remove(&filing.filing_id);
        self.staged_changes
            .entry(filing.entity_id.clone())
            .or_default()
            .insert(filing.period.clone(), filing);
    }
}

/// The index's connection, opened on first use.
async fn connection<'a>(
    slot: &'a mut Option<SqliteConn>,
    pool: &SqlitePool,
) -> Result<&'a mut SqliteConn, DbError> {
    let conn = match slot.take() {
        Some(conn) => conn,
        None => {
            debug!("Opening index connection to {}", pool.database_url());
            pool.get().await?
        }
    };
    Ok(slot.insert(conn))
}
