//! The contract between the core and a dialect's wire driver: a
//! byte-oriented request/response channel that accepts parameterised SQL
//! and returns typed rows.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::row::{Row, RowStream};
use crate::value::Value;

/// One live database connection. Exclusive-use between pool acquire and
/// release.
#[async_trait]
pub trait Connection: Send {
    /// Executes a statement and returns the affected row count.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// Runs a query and buffers all result rows.
    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>>;

    /// Runs a query and yields rows lazily; the stream borrows the
    /// connection for its lifetime.
    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>>;

    /// Cheap liveness probe used by acquire-time validation.
    async fn ping(&mut self) -> Result<()>;

    /// Whether the connection is known to be unusable (a failed or
    /// cancelled mid-flight operation leaves it broken).
    fn is_broken(&self) -> bool;
}

/// Produces connections for the pool; implemented by each dialect binding.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>>;
}
