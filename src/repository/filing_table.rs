//! Durable filing tables.
//!
//! Both tables carry the full filing metadata. `latest_filings` is keyed by
//! record id, so an upsert replaces the previous filing for that record;
//! `duplicates` is keyed by filing id.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::FilingRecord;
use super::pool::{DbError, SqliteConn, SqlitePool};
use crate::index::IndexError;
use crate::models::FilingMetadata;

/// Which of the two filing tables a [`FilingTable`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Latest,
    Duplicates,
}

impl TableKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Latest => "latest_filings",
            Self::Duplicates => "duplicates",
        }
    }
}

/// Column used for exact-match lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilingKey {
    RecordId,
    FilingId,
    EntityId,
}

impl FilingKey {
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::RecordId => "record_id",
            Self::FilingId => "irs_efile_id",
            Self::EntityId => "ein",
        }
    }
}

/// Run the same Diesel DSL against whichever table `$kind` names.
///
/// `$t` is bound to the table's schema module inside `$body`.
macro_rules! with_table {
    ($kind:expr, $t:ident => $body:expr) => {{
        match $kind {
            TableKind::Latest => {
                use crate::schema::latest_filings as $t;
                $body
            }
            TableKind::Duplicates => {
                use crate::schema::duplicates as $t;
                $body
            }
        }
    }};
}

/// One filing table with point lookups, listing, and upsert/delete.
///
/// The plain methods open a connection per call. The `*_on` variants run on
/// a caller's connection so a scan can reuse one connection and a commit can
/// run inside one transaction.
#[derive(Clone, Debug)]
pub struct FilingTable {
    pool: SqlitePool,
    kind: TableKind,
}

impl FilingTable {
    /// The table of current filings, keyed by record id.
    pub fn latest(pool: SqlitePool) -> Self {
        Self {
            pool,
            kind: TableKind::Latest,
        }
    }

    /// The table of superseded filings, keyed by filing id.
    pub fn duplicates(pool: SqlitePool) -> Self {
        Self {
            pool,
            kind: TableKind::Duplicates,
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a filing or replace the row sharing its primary key.
    pub async fn upsert(&self, filing: &FilingMetadata) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        self.upsert_on(&mut conn, filing).await
    }

    pub(crate) async fn upsert_on(
        &self,
        conn: &mut SqliteConn,
        filing: &FilingMetadata,
    ) -> Result<(), DbError> {
        let record = FilingRecord::from(filing);

        with_table!(self.kind, t => {
            diesel::replace_into(t::table)
                .values((
                    t::record_id.eq(&record.record_id),
                    t::irs_efile_id.eq(&record.irs_efile_id),
                    t::irs_dln.eq(&record.irs_dln),
                    t::ein.eq(&record.ein),
                    t::period.eq(&record.period),
                    t::name_org.eq(&record.name_org),
                    t::form_type.eq(&record.form_type),
                    t::date_submitted.eq(&record.date_submitted),
                    t::date_uploaded.eq(&record.date_uploaded),
                    t::date_downloaded.eq(&record.date_downloaded),
                    t::url.eq(&record.url),
                ))
                .execute(conn)
                .await?
        });

        Ok(())
    }

    /// Delete the row for a filing id. Returns whether a row was removed.
    pub async fn delete_if_exists(&self, filing_id: &str) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;
        self.delete_if_exists_on(&mut conn, filing_id).await
    }

    pub(crate) async fn delete_if_exists_on(
        &self,
        conn: &mut SqliteConn,
        filing_id: &str,
    ) -> Result<bool, DbError> {
        let rows = with_table!(self.kind, t => {
            diesel::delete(t::table.filter(t::irs_efile_id.eq(filing_id)))
                .execute(conn)
                .await?
        });

        Ok(rows > 0)
    }

    /// Exact-match lookup on one column. Returns every matching row.
    pub async fn by_key(
        &self,
        key: FilingKey,
        value: &str,
    ) -> Result<Vec<FilingMetadata>, DbError> {
        let mut conn = self.pool.get().await?;
        self.by_key_on(&mut conn, key, value).await
    }

    pub(crate) async fn by_key_on(
        &self,
        conn: &mut SqliteConn,
        key: FilingKey,
        value: &str,
    ) -> Result<Vec<FilingMetadata>, DbError> {
        let records: Vec<FilingRecord> = with_table!(self.kind, t => {
            match key {
                FilingKey::RecordId => {
                    t::table
                        .filter(t::record_id.eq(value))
                        .load::<FilingRecord>(conn)
                        .await?
                }
                FilingKey::FilingId => {
                    t::table
                        .filter(t::irs_efile_id.eq(value))
                        .load::<FilingRecord>(conn)
                        .await?
                }
                FilingKey::EntityId => {
                    t::table
                        .filter(t::ein.eq(value))
                        .load::<FilingRecord>(conn)
                        .await?
                }
            }
        });

        records.into_iter().map(FilingMetadata::try_from).collect()
    }

    /// Lookup on a column expected to identify at most one row.
    ///
    /// More than one match means the table is corrupt.
    pub async fn unique_by_key(
        &self,
        key: FilingKey,
        value: &str,
    ) -> Result<Option<FilingMetadata>, IndexError> {
        let mut conn = self.pool.get().await?;
        self.unique_by_key_on(&mut conn, key, value).await
    }

    pub(crate) async fn unique_by_key_on(
        &self,
        conn: &mut SqliteConn,
        key: FilingKey,
        value: &str,
    ) -> Result<Option<FilingMetadata>, IndexError> {
        let mut rows = self.by_key_on(conn, key, value).await?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            n => Err(IndexError::InvariantViolation(format!(
                "{} rows in {} for {} = '{}'",
                n,
                self.kind.table_name(),
                key.column_name(),
                value
            ))),
        }
    }

    /// Distinct entity ids present in the table.
    pub async fn distinct_entity_ids(&self) -> Result<Vec<String>, DbError> {
        let mut conn = self.pool.get().await?;

        let eins = with_table!(self.kind, t => {
            t::table
                .select(t::ein)
                .distinct()
                .load::<String>(&mut conn)
                .await?
        });

        Ok(eins)
    }

    /// Every row in the table, in no particular order.
    pub async fn all(&self) -> Result<Vec<FilingMetadata>, DbError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<FilingRecord> = with_table!(self.kind, t => {
            t::table.load::<FilingRecord>(&mut conn).await?
        });

        records.into_iter().map(FilingMetadata::try_from).collect()
    }

    /// Number of rows in the table.
    pub async fn count(&self) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;

        let count = with_table!(self.kind, t => {
            t::table.count().get_result::<i64>(&mut conn).await?
        });

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{amended, filing, original};
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("state.sqlite"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    #[tokio::test]
    async fn test_latest_upsert_replaces_by_record() {
        let (ctx, _dir) = setup_test_db().await;
        let latest = ctx.latest();

        latest.upsert(&original()).await.unwrap();
        latest.upsert(&amended()).await.unwrap();

        let rows = latest
            .by_key(FilingKey::RecordId, "943041314_201012")
            .await
            .unwrap();
        assert_eq!(rows, vec![amended()]);
        assert_eq!(latest.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_keyed_by_filing_id() {
        let (ctx, _dir) = setup_test_db().await;
        let dupes = ctx.duplicates();

        dupes.upsert(&original()).await.unwrap();
        dupes.upsert(&amended()).await.unwrap();
        dupes.upsert(&original()).await.unwrap();

        assert_eq!(dupes.count().await.unwrap(), 2);
        let rows = dupes
            .by_key(FilingKey::RecordId, "943041314_201012")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_if_exists() {
        let (ctx, _dir) = setup_test_db().await;
        let latest = ctx.latest();
        latest.upsert(&original()).await.unwrap();

        assert!(!latest.delete_if_exists("no-such-filing").await.unwrap());
        assert!(latest
            .delete_if_exists("201120919349300412")
            .await
            .unwrap());
        assert!(latest.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_by_each_key() {
        let (ctx, _dir) = setup_test_db().await;
        let latest = ctx.latest();
        latest.upsert(&original()).await.unwrap();

        let by_filing = latest
            .by_key(FilingKey::FilingId, "201120919349300412")
            .await
            .unwrap();
        let by_entity = latest
            .by_key(FilingKey::EntityId, "943041314")
            .await
            .unwrap();
        let missing = latest.by_key(FilingKey::EntityId, "000000000").await.unwrap();

        assert_eq!(by_filing, vec![original()]);
        assert_eq!(by_entity, vec![original()]);
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_entity_ids() {
        let (ctx, _dir) = setup_test_db().await;
        let latest = ctx.latest();
        latest.upsert(&original()).await.unwrap();
        latest
            .upsert(&filing("3", "943041314", "201112", "2012-10-01", "2016-03-21T17:23:53"))
            .await
            .unwrap();
        latest
            .upsert(&filing("4", "208419458", "201112", "2012-10-01", "2016-03-21T17:23:53"))
            .await
            .unwrap();

        let mut eins = latest.distinct_entity_ids().await.unwrap();
        eins.sort();
        assert_eq!(eins, vec!["208419458", "943041314"]);
    }

    #[tokio::test]
    async fn test_unique_by_key_detects_corruption() {
        let (ctx, _dir) = setup_test_db().await;
        let dupes = ctx.duplicates();
        dupes.upsert(&original()).await.unwrap();

        let found = dupes
            .unique_by_key(FilingKey::FilingId, "201120919349300412")
            .await
            .unwrap();
        assert_eq!(found, Some(original()));

        dupes.upsert(&amended()).await.unwrap();
        let err = dupes
            .unique_by_key(FilingKey::RecordId, "943041314_201012")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvariantViolation(_)));
    }
}
