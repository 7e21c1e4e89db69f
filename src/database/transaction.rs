//! Transactions
//!
//! A [`Transaction`] pins one pooled connection until it is committed or
//! rolled back. Both consume the handle, so each transaction ends exactly
//! once; dropping an unfinished transaction rolls it back when the
//! connection returns to the pool.

use crate::database::connection::DatabaseBackend;
use crate::database::stats::StatsTracker;
use crate::error::{DatabaseError, Result};
use crate::logging::Logger;
use sqlx::{MySql, Postgres, Sqlite};
use std::sync::Arc;
use std::time::Instant;

/// Backend transaction
pub enum TransactionInner {
    /// SQLite transaction
    Sqlite(sqlx::Transaction<'static, Sqlite>),
    /// PostgreSQL transaction
    Postgres(sqlx::Transaction<'static, Postgres>),
    /// MySQL transaction
    MySql(sqlx::Transaction<'static, MySql>),
}

/// Open transaction handle
pub struct Transaction {
    inner: TransactionInner,
    stats: Arc<StatsTracker>,
    logger: Logger,
}

impl Transaction {
    pub(crate) fn new(inner: TransactionInner, stats: Arc<StatsTracker>, logger: Logger) -> Self {
        Self {
            inner,
            stats,
            logger,
        }
    }

    /// Backend of the pinned connection
    pub fn backend(&self) -> DatabaseBackend {
        match self.inner {
            TransactionInner::Sqlite(_) => DatabaseBackend::SQLite,
            TransactionInner::Postgres(_) => DatabaseBackend::PostgreSQL,
            TransactionInner::MySql(_) => DatabaseBackend::MySQL,
        }
    }

    /// Run one statement inside the transaction
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        let start = Instant::now();
        let result = match &mut self.inner {
            TransactionInner::Sqlite(tx) => sqlx::query(sql)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
            TransactionInner::Postgres(tx) => sqlx::query(sql)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
            TransactionInner::MySql(tx) => sqlx::query(sql)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
        };
        self.stats
            .observe(&self.logger, "transaction statement", start.elapsed(), result.is_ok());
        result.map_err(|e| DatabaseError::operation("transaction statement failed", e))
    }

    /// Raw access to the backend transaction
    pub fn inner_mut(&mut self) -> &mut TransactionInner {
        &mut self.inner
    }

    /// Commit and release the connection
    pub async fn commit(self) -> Result<()> {
        let start = Instant::now();
        let result = match self.inner {
            TransactionInner::Sqlite(tx) => tx.commit().await,
            TransactionInner::Postgres(tx) => tx.commit().await,
            TransactionInner::MySql(tx) => tx.commit().await,
        };
        self.stats
            .observe(&self.logger, "commit", start.elapsed(), result.is_ok());
        result.map_err(|e| DatabaseError::operation("failed to commit transaction", e))
    }

    /// Roll back and release the connection
    pub async fn rollback(self) -> Result<()> {
        let start = Instant::now();
        let result = match self.inner {
            TransactionInner::Sqlite(tx) => tx.rollback().await,
            TransactionInner::Postgres(tx) => tx.rollback().await,
            TransactionInner::MySql(tx) => tx.rollback().await,
        };
        self.stats
            .observe(&self.logger, "rollback", start.elapsed(), result.is_ok());
        result.map_err(|e| DatabaseError::operation("failed to roll back transaction", e))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("backend", &self.backend())
            .finish()
    }
}
