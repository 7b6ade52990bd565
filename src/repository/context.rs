//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and provides access to both filing tables.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::filing_table::FilingTable;
use super::pool::{DbError, SqlitePool};

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::new(&data_dir.join("state.sqlite"));
/// ctx.init_schema().await?;
/// let eins = ctx.latest().distinct_entity_ids().await?;
/// ```
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: SqlitePool,
}

impl DbContext {
    /// Create a context from a database file path.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: SqlitePool::from_path(db_path),
        }
    }

    /// Table of the current filing for each record.
    pub fn latest(&self) -> FilingTable {
        FilingTable::latest(self.pool.clone())
    }

    /// Table of superseded filings.
    pub fn duplicates(&self) -> FilingTable {
        FilingTable::duplicates(self.pool.clone())
    }

    /// Initialize database schema.
    ///
    /// Safe to call on an existing database.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(include_str!("schema_sqlite.sql")).await
    }

    /// Verify the database can be opened.
    pub async fn test_connection(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute("SELECT 1").await
    }
}
