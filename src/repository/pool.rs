//! Diesel async connection handling for SQLite.
//!
//! Uses diesel-async's SyncConnectionWrapper to provide an async interface
//! for SQLite. Since SQLite connections are lightweight, we create new
//! connections per request rather than pooling.

use std::path::Path;

use diesel::result::{ConnectionError, DatabaseErrorInformation, DatabaseErrorKind};
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::AsyncConnection;

/// Diesel error type alias.
pub type DbError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// SQLite connection factory (creates connections on demand).
#[derive(Clone, Debug)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    /// Create a new SQLite pool.
    pub fn new(database_url: &str) -> Self {
        // Strip sqlite: prefix if present
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Create pool from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Get a connection.
    pub async fn get(&self) -> Result<SqliteConn, DbError> {
        SqliteConn::establish(&self.database_url)
            .await
            .map_err(|e| connect_error(&self.database_url, e))
    }

    /// Get the database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Message carrier so connection failures surface as `DbError`.
#[derive(Debug)]
struct ConnectFailure(String);

impl DatabaseErrorInformation for ConnectFailure {
    fn message(&self) -> &str {
        &self.0
    }
    fn details(&self) -> Option<&str> {
        None
    }
    fn hint(&self) -> Option<&str> {
        None
    }
    fn table_name(&self) -> Option<&str> {
        None
    }
    fn column_name(&self) -> Option<&str> {
        None
    }
    fn constraint_name(&self) -> Option<&str> {
        None
    }
    fn statement_position(&self) -> Option<i32> {
        None
    }
}

fn connect_error(url: &str, e: ConnectionError) -> DbError {
    DbError::DatabaseError(
        DatabaseErrorKind::Unknown,
        Box::new(ConnectFailure(format!("cannot open {}: {}", url, e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_keeps_message() {
        let err = connect_error(
            "/missing/state.sqlite",
            ConnectionError::BadConnection("unable to open database file".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("/missing/state.sqlite"));
        assert!(msg.contains("unable to open database file"));
    }

    #[test]
    fn test_prefix_stripped() {
        assert_eq!(
            SqlitePool::new("sqlite:/data/state.sqlite").database_url(),
            "/data/state.sqlite"
        );
        assert_eq!(
            SqlitePool::new("/data/state.sqlite").database_url(),
            "/data/state.sqlite"
        );
    }
}
