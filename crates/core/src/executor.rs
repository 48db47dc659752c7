//! Uniform execution surface over a pool or a pinned transaction.
//!
//! Repository calls accept any [`Executor`]; when a transaction is passed
//! the SQL routes through its pinned connection and never contends on the
//! pool.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::pool::Pool;
use crate::row::{Row, RowStream};
use crate::transaction::Transaction;
use crate::value::Value;

#[async_trait]
pub trait Executor: Send {
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Runs a query, buffering all rows.
    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>>;

    /// Runs a statement, returning the affected row count.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// Runs a query, yielding rows lazily where the executor can.
    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>>;
}

#[async_trait]
impl Executor for Pool {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Pool::dialect(self)
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        debug!(sql, "pool query");
        let mut conn = self.acquire(cancel).await?;
        conn.query(sql, params, cancel).await
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        debug!(sql, "pool execute");
        let mut conn = self.acquire(cancel).await?;
        conn.execute(sql, params, cancel).await
    }

    /// The connection returns to the pool when the query completes, so the
    /// pool-level stream is buffered. Stream against a [`Transaction`] for
    /// true row-at-a-time delivery.
    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        let rows = Executor::query_rows(self, sql, params, cancel).await?;
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }
}

#[async_trait]
impl Executor for Transaction {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Transaction::dialect(self)
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        self.ensure_active()?;
        debug!(sql, "transaction query");
        self.pinned()?.query(sql, params, cancel).await
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.ensure_active()?;
        debug!(sql, "transaction execute");
        self.pinned()?.execute(sql, params, cancel).await
    }

    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        self.ensure_active()?;
        debug!(sql, "transaction stream");
        self.pinned()?.query_stream(sql, params, cancel).await
    }
}
