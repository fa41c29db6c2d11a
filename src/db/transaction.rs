//! Read-committed units of work.
//!
//! [`TxCoordinator::read_committed`] either joins a transaction the caller
//! already holds or begins, commits and rolls back its own. The active
//! transaction is passed explicitly, so every call site shows which one
//! happens.

use crate::db::executor::{mysql, postgres, sqlite};
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{DriverKind, Row};
use crate::query::{Dialect, Statement};
use futures_util::future::BoxFuture;
use sqlx::{Executor, MySql, Postgres, Sqlite, Transaction};
use tracing::{debug, warn};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.driver()).finish()
    }
}

impl DbTransaction {
    pub fn driver(&self) -> DriverKind {
        match self {
            DbTransaction::MySql(_) => DriverKind::MySQL,
            DbTransaction::Postgres(_) => DriverKind::PostgreSQL,
            DbTransaction::SQLite(_) => DriverKind::SQLite,
        }
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::for_driver(self.driver())
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        let result = match self {
            DbTransaction::MySql(tx) => tx.commit().await,
            DbTransaction::Postgres(tx) => tx.commit().await,
            DbTransaction::SQLite(tx) => tx.commit().await,
        };
        result.map_err(|e| DbError::transaction(format!("Failed to commit: {}", e)))
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        let result = match self {
            DbTransaction::MySql(tx) => tx.rollback().await,
            DbTransaction::Postgres(tx) => tx.rollback().await,
            DbTransaction::SQLite(tx) => tx.rollback().await,
        };
        result.map_err(|e| DbError::transaction(format!("Failed to roll back: {}", e)))
    }

    pub async fn fetch(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        match self {
            DbTransaction::MySql(tx) => mysql::fetch(&mut **tx, statement).await,
            DbTransaction::Postgres(tx) => postgres::fetch(&mut **tx, statement).await,
            DbTransaction::SQLite(tx) => sqlite::fetch(&mut **tx, statement).await,
        }
    }

    pub async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        match self {
            DbTransaction::MySql(tx) => mysql::execute(&mut **tx, statement).await,
            DbTransaction::Postgres(tx) => postgres::execute(&mut **tx, statement).await,
            DbTransaction::SQLite(tx) => sqlite::execute(&mut **tx, statement).await,
        }
    }
}

/// Runs units of work at READ COMMITTED against one pool.
///
/// PostgreSQL sets the level per transaction. MySQL cannot change the level
/// of a started transaction, so pools opened with [`DbPool::connect_url`]
/// set it per session. SQLite transactions are serializable, which is
/// stronger.
#[derive(Debug, Clone)]
pub struct TxCoordinator {
    pool: DbPool,
}

impl TxCoordinator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Begin a new transaction at READ COMMITTED.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        let begin_failed = |e: sqlx::Error| DbError::transaction(format!("Failed to begin: {}", e));

        match &self.pool {
            DbPool::MySql(p) => Ok(DbTransaction::MySql(p.begin().await.map_err(begin_failed)?)),
            DbPool::Postgres(p) => {
                let mut tx = p.begin().await.map_err(begin_failed)?;
                (&mut *tx)
                    .execute("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
                    .await
                    .map_err(begin_failed)?;
                Ok(DbTransaction::Postgres(tx))
            }
            DbPool::SQLite(p) => Ok(DbTransaction::SQLite(p.begin().await.map_err(begin_failed)?)),
        }
    }

    /// Run `work` in a read-committed unit of work.
    ///
    /// With `Some(active)` the work joins that transaction and nothing is
    /// committed here. With `None` a transaction is begun, committed when the
    /// work succeeds and rolled back when it fails; the work's error is
    /// returned unchanged.
    pub async fn read_committed<T, F>(
        &self,
        active: Option<&mut DbTransaction>,
        work: F,
    ) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut DbTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        if let Some(tx) = active {
            debug!("Joining active transaction");
            return work(tx).await;
        }

        let mut tx = self.begin().await?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed unit of work failed");
                }
                Err(e)
            }
        }
    }
}
