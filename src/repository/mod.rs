//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM over SQLite. The index keeps two tables
//! with identical columns: `latest_filings` (one row per record) and
//! `duplicates` (superseded filings, one row per filing id).

pub mod context;
pub mod filing_table;
pub mod models;
pub mod pool;

pub use context::DbContext;
pub use filing_table::{FilingKey, FilingTable};
pub use models::FilingRecord;
pub use pool::{DbError, SqliteConn, SqlitePool};
