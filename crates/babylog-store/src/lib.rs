//! The record store: an embedded, single-writer, ACID key-value database
//! holding every family, entry, config blob and access token.
//!
//! Built on `redb` via the `redb-bincode` typed-table wrapper, the way the
//! store this crate is modeled on uses it for its own event log. A single
//! writer transaction at a time keeps the authoritative `seq` counters
//! (one per family) trivially race-free; readers never block behind it.

mod config_ops;
mod entry_ops;
pub mod error;
mod family_ops;
mod migration_ops;
mod tables;
mod token_ops;

use std::ops;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use redb_bincode::{ReadTransaction, WriteTransaction};
use snafu::ResultExt as _;
use tracing::debug;

pub use self::error::{StoreError, StoreResult};
pub use self::tables::*;

const LOG_TARGET: &str = "babylog::store";

/// Default ceiling on how long a write waits for the store's single writer
/// slot before giving up with `StoreError::Transient`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A write transaction in progress. Exists mainly to give the ops modules a
/// single, uniformly named type to borrow from, matching the shape every
/// operation function is written against.
pub struct WriteTransactionCtx {
    dbtx: WriteTransaction,
}

impl From<WriteTransaction> for WriteTransactionCtx {
    fn from(dbtx: WriteTransaction) -> Self {
        Self { dbtx }
    }
}

impl ops::Deref for WriteTransactionCtx {
    type Target = WriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.dbtx
    }
}

impl ops::DerefMut for WriteTransactionCtx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.dbtx
    }
}

impl WriteTransactionCtx {
    fn commit(self) -> Result<(), redb::CommitError> {
        self.dbtx.commit()
    }
}

#[derive(Debug)]
pub struct Database {
    inner: Arc<redb_bincode::Database>,
    busy_timeout: Duration,
}

impl Database {
    pub async fn new_in_memory() -> StoreResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(error::DatabaseSnafu)?;
        Self::open_inner(inner, DEFAULT_BUSY_TIMEOUT).await
    }

    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Database> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Like [`Self::open`], but with an explicit ceiling on how long a write
    /// waits for the writer slot before failing with `StoreError::Transient`.
    #[cfg(test)]
    async fn new_in_memory_with_busy_timeout(busy_timeout: Duration) -> StoreResult<Database> {
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(error::DatabaseSnafu)?;
        Self::open_inner(inner, busy_timeout).await
    }

    pub async fn open_with_busy_timeout(
        path: impl Into<PathBuf>,
        busy_timeout: Duration,
    ) -> StoreResult<Database> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(error::IoSnafu)?;
        }
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");

        let inner = tokio::task::spawn_blocking(move || redb::Database::create(path))
            .await
            .context(error::JoinSnafu)?
            .context(error::DatabaseSnafu)?;

        Self::open_inner(inner, busy_timeout).await
    }

    async fn open_inner(inner: redb::Database, busy_timeout: Duration) -> StoreResult<Database> {
        let inner = Arc::new(redb_bincode::Database::from(inner));

        Self::write_with_inner(inner.clone(), busy_timeout, |tx| {
            Self::init_tables_tx(tx)?;
            Self::handle_db_ver_migrations(tx)?;
            Ok(())
        })
        .await?;

        Ok(Self { inner, busy_timeout })
    }

    /// Runs `f` against a fresh write transaction via `block_in_place`, the
    /// way the teacher keeps a blocking store call from starving the async
    /// runtime, racing the whole attempt against `busy_timeout`: exceeding it
    /// yields `StoreError::Transient` rather than blocking the caller
    /// forever behind the store's single writer slot.
    async fn write_with_inner<T: Send + 'static>(
        inner: Arc<redb_bincode::Database>,
        busy_timeout: Duration,
        f: impl FnOnce(&WriteTransactionCtx) -> StoreResult<T> + Send + 'static,
    ) -> StoreResult<T> {
        let attempt = tokio::spawn(async move {
            tokio::task::block_in_place(|| {
                let dbtx = WriteTransactionCtx::from(inner.begin_write().context(error::TransactionSnafu)?);
                let res = f(&dbtx)?;
                dbtx.commit().context(error::CommitSnafu)?;
                Ok(res)
            })
        });

        match tokio::time::timeout(busy_timeout, attempt).await {
            Ok(joined) => joined.context(error::JoinSnafu)?,
            Err(_) => error::TransientSnafu.fail(),
        }
    }

    pub(crate) async fn write_with<T: Send + 'static>(
        &self,
        f: impl FnOnce(&WriteTransactionCtx) -> StoreResult<T> + Send + 'static,
    ) -> StoreResult<T> {
        Self::write_with_inner(self.inner.clone(), self.busy_timeout, f).await
    }

    pub(crate) async fn read_with<T: Send + 'static>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> StoreResult<T> + Send + 'static,
    ) -> StoreResult<T> {
        let inner = self.inner.clone();
        tokio::task::block_in_place(|| {
            let tx = inner.begin_read().context(error::TransactionSnafu)?;
            f(&tx)
        })
    }
}

#[cfg(test)]
mod tests {
    use babylog_core::Timestamp;

    use super::*;

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn fresh_database_initializes_tables() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db
            .create_family("The Smiths".into(), String::new())
            .await
            .unwrap();
        assert_eq!(family.seq, 0);
        assert!(!family.archived);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn entry_upsert_assigns_monotonic_family_seq() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();

        let e1 = babylog_core::EntryId::new();
        let e2 = babylog_core::EntryId::new();

        let a = db
            .assign_and_upsert_entry(family.id, e1, Timestamp::now(), "feed".into(), "a".into())
            .await
            .unwrap();
        let b = db
            .assign_and_upsert_entry(family.id, e2, Timestamp::now(), "sleep".into(), "b".into())
            .await
            .unwrap();

        assert_eq!(a.seq, Some(1));
        assert_eq!(b.seq, Some(2));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn scan_since_cursor_respects_limit_and_ordering() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();

        for i in 0..5 {
            db.assign_and_upsert_entry(
                family.id,
                babylog_core::EntryId::new(),
                Timestamp::now(),
                "feed".into(),
                format!("entry-{i}"),
            )
            .await
            .unwrap();
        }

        let (page, cursor, has_more) = db.scan_since_cursor(family.id, 0, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(has_more);
        assert_eq!(cursor, 3);

        let (rest, cursor2, has_more2) = db.scan_since_cursor(family.id, cursor, 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(!has_more2);
        assert_eq!(cursor2, 5);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn rewriting_an_entry_drops_its_stale_index_rows() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();
        let entry_id = babylog_core::EntryId::new();

        db.assign_and_upsert_entry(family.id, entry_id, Timestamp::now(), "feed".into(), "a".into())
            .await
            .unwrap();
        db.assign_and_upsert_entry(family.id, entry_id, Timestamp::now(), "feed".into(), "b".into())
            .await
            .unwrap();

        let (page, _, _) = db.scan_since_cursor(family.id, 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].value, "b");
        assert_eq!(page[0].seq, Some(2));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn mark_deleted_is_idempotent_for_unknown_entries() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();
        let unknown = babylog_core::EntryId::new();

        let result = db.mark_deleted(family.id, unknown).await.unwrap();
        assert!(result.is_none());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn revoked_token_no_longer_resolves() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();
        let token = db.issue_token(family.id, None, None).await.unwrap();

        assert!(db.resolve_token(token.token).await.unwrap().is_some());

        db.revoke_token(token.token).await.unwrap();
        assert!(db.resolve_token(token.token).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn expired_token_does_not_resolve() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();
        let token = db
            .issue_token(family.id, None, Some(Timestamp(1)))
            .await
            .unwrap();

        assert!(db.resolve_token(token.token).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn list_tokens_excludes_revoked_and_expired() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();

        let usable = db.issue_token(family.id, None, None).await.unwrap();
        let revoked = db.issue_token(family.id, None, None).await.unwrap();
        db.issue_token(family.id, None, Some(Timestamp(1)))
            .await
            .unwrap();
        db.revoke_token(revoked.token).await.unwrap();

        let tokens = db.list_tokens(family.id).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, usable.token);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn rename_family_updates_name_and_notes() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), "old notes".into()).await.unwrap();

        let renamed = db
            .rename_family(family.id, "New Name".into(), "new notes".into())
            .await
            .unwrap();
        assert_eq!(renamed.name, "New Name");
        assert_eq!(renamed.notes, "new notes");

        let fetched = db.get_family(family.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "New Name");
        assert_eq!(fetched.notes, "new notes");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn contended_write_fails_transient_after_busy_timeout() {
        let db = Database::new_in_memory_with_busy_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();

        let inner = db.inner.clone();
        let hold = tokio::task::spawn_blocking(move || {
            let tx = inner.begin_write().unwrap();
            std::thread::sleep(Duration::from_millis(300));
            tx.commit().unwrap();
        });

        // Give the held transaction time to claim the writer slot first.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = db
            .rename_family(family.id, "New Name".into(), String::new())
            .await;
        assert!(matches!(result, Err(StoreError::Transient { .. })));

        hold.await.unwrap();
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn config_round_trips() {
        let db = Database::new_in_memory().await.unwrap();
        let family = db.create_family("Fam".into(), String::new()).await.unwrap();

        assert!(db.get_config(family.id).await.unwrap().is_none());

        db.save_config(family.id, "{\"theme\":\"dark\"}".into())
            .await
            .unwrap();
        let config = db.get_config(family.id).await.unwrap().unwrap();
        assert_eq!(config.data, "{\"theme\":\"dark\"}");
    }
}
