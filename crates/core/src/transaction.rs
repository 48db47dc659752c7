//! Transactions pin one pooled connection for their lifetime and scope a
//! LIFO stack of savepoints over it.
//!
//! A handle dropped without a terminal call rolls back: the pinned
//! connection moves into a spawned rollback task when a runtime is
//! available, and is closed instead of reused otherwise.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dialect::{Dialect, IsolationLevel};
use crate::error::{Error, Result, UsageError};
use crate::pool::{Pool, PooledConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

pub struct Transaction {
    conn: Option<PooledConnection>,
    dialect: Arc<dyn Dialect>,
    savepoints: Vec<String>,
    state: TxState,
}

impl Transaction {
    /// Acquires a connection from the pool, pins it, and starts a
    /// transaction on it.
    pub async fn begin(
        pool: &Pool,
        isolation: Option<IsolationLevel>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let dialect = pool.dialect();
        let mut conn = pool.acquire(cancel).await?;
        for sql in dialect.begin_transaction_sql(isolation) {
            conn.execute(&sql, &[], cancel).await?;
        }

        Ok(Self {
            conn: Some(conn),
            dialect,
            savepoints: Vec::new(),
            state: TxState::Active,
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    #[must_use]
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub async fn commit(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_active()?;
        let sql = self.dialect.commit_sql();
        self.pinned()?.execute(sql, &[], cancel).await?;
        self.state = TxState::Committed;
        self.conn = None;
        Ok(())
    }

    pub async fn rollback(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_active()?;
        let sql = self.dialect.rollback_sql();
        self.pinned()?.execute(sql, &[], cancel).await?;
        self.state = TxState::RolledBack;
        self.conn = None;
        Ok(())
    }

    /// Creates a savepoint. Names must be unique within the transaction.
    pub async fn create_savepoint(
        &mut self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_active()?;
        if self.savepoints.iter().any(|existing| existing == name) {
            return Err(UsageError::DuplicateSavepoint {
                name: name.to_string(),
            }
            .into());
        }
        let sql = self.dialect.savepoint_sql(name);
        self.pinned()?.execute(&sql, &[], cancel).await?;
        self.savepoints.push(name.to_string());
        Ok(())
    }

    /// Rolls back to a savepoint, leaving the outer transaction alive and
    /// the savepoint itself re-usable. Savepoints created after it are
    /// discarded.
    pub async fn rollback_to_savepoint(
        &mut self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_active()?;
        let position = self.savepoint_position(name)?;
        let sql = self.dialect.rollback_savepoint_sql(name);
        self.pinned()?.execute(&sql, &[], cancel).await?;
        self.savepoints.truncate(position + 1);
        Ok(())
    }

    /// Releases a savepoint. A no-op statement-wise on dialects without
    /// explicit release, but the stack entry (and everything nested inside
    /// it) is always removed.
    pub async fn release_savepoint(
        &mut self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_active()?;
        let position = self.savepoint_position(name)?;
        if let Some(sql) = self.dialect.release_savepoint_sql(name) {
            self.pinned()?.execute(&sql, &[], cancel).await?;
        }
        self.savepoints.truncate(position);
        Ok(())
    }

    pub(crate) fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(UsageError::TransactionCompleted.into())
        }
    }

    pub(crate) fn pinned(&mut self) -> Result<&mut PooledConnection> {
        self.conn.as_mut().ok_or(Error::Disposed {
            resource: "transaction",
        })
    }

    fn savepoint_position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .position(|existing| existing == name)
            .ok_or_else(|| {
                UsageError::UnknownSavepoint {
                    name: name.to_string(),
                }
                .into()
            })
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TxState::Active {
            return;
        }
        let Some(conn) = self.conn.take() else {
            return;
        };

        warn!("transaction dropped without terminal call; rolling back");
        let rollback_sql = self.dialect.rollback_sql();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut conn = conn;
                    let cancel = CancellationToken::new();
                    // On failure the driver marks the connection broken and
                    // the pool closes it instead of reusing it.
                    let _ = conn.execute(rollback_sql, &[], &cancel).await;
                });
            }
            Err(_) => {
                // No runtime to run the rollback on; close the connection
                // rather than return it to the pool mid-transaction.
                drop(conn.detach());
            }
        }
        self.state = TxState::RolledBack;
    }
}
