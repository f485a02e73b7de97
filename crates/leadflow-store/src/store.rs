//! Pool-owning entry point.
//!
//! [`Store`] hands out pooled connections for reads and runs write units of
//! work inside `BEGIN IMMEDIATE` transactions, so the write lock is taken up
//! front and two writers never interleave a read-check-write sequence.

use rusqlite::{Transaction, TransactionBehavior};
use tracing::{debug, instrument};

use crate::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;

/// Migrated database behind a connection pool. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    pool: ConnectionPool,
}

impl Store {
    /// Open (creating if needed) a file database and bring its schema up to date.
    #[instrument(skip(config))]
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let pool = connection::new_file(path, config)?;
        Self::from_pool(pool)
    }

    /// Fresh in-memory database with the schema applied.
    pub fn open_in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        Self::from_pool(pool)
    }

    /// Wrap an existing pool, running pending migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let applied = run_migrations(&*pool.get()?)?;
        debug!(applied, "store ready");
        Ok(Self { pool })
    }

    /// A pooled connection for reads or single-statement writes.
    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Run `f` in an immediate transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` drops the transaction, which
    /// rolls it back. A lock that cannot be taken within the busy timeout
    /// surfaces as [`StoreError::ConcurrentModification`].
    pub fn with_immediate_tx<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::UserRepo;
    use crate::types::NewUser;
    use assert_matches::assert_matches;

    const T0: &str = "2024-03-04T09:00:00.000Z";

    fn new_user(name: &str) -> NewUser {
        NewUser {
            name: name.into(),
            ..NewUser::default()
        }
    }

    #[test]
    fn committed_work_is_visible() {
        let store = Store::open_in_memory().unwrap();
        let user = store
            .with_immediate_tx(|tx| UserRepo::create(tx, &new_user("Ana"), T0))
            .unwrap();
        let conn = store.conn().unwrap();
        assert_eq!(UserRepo::get(&conn, &user.id).unwrap(), Some(user));
    }

    #[test]
    fn failed_work_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.with_immediate_tx(|tx| {
            let _ = UserRepo::create(tx, &new_user("Ben"), T0)?;
            Err(StoreError::Internal("boom".into()))
        });
        assert_matches!(result, Err(StoreError::Internal(_)));
        let conn = store.conn().unwrap();
        assert!(UserRepo::list(&conn).unwrap().is_empty());
    }

    #[test]
    fn file_store_migrates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leadflow.db");
        let path = path.to_str().unwrap();
        let _ = Store::open(path, &ConnectionConfig::default()).unwrap();
        let store = Store::open(path, &ConnectionConfig::default()).unwrap();
        let conn = store.conn().unwrap();
        assert_eq!(
            crate::migrations::current_version(&conn).unwrap(),
            crate::migrations::latest_version()
        );
    }

    #[test]
    fn file_connections_use_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.db");
        let store = Store::open(path.to_str().unwrap(), &ConnectionConfig::default()).unwrap();
        let state = connection::verify_pragmas(&store.conn().unwrap()).unwrap();
        assert_eq!(state.journal_mode, "wal");
        assert!(state.foreign_keys_enabled);
    }
}
