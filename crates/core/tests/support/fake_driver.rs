use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use quarry_core::{
    Connection, ConnectionError, ConnectionFactory, Error, Result, Row, RowStream, Value,
};

/// Shared record of every statement the fake driver saw, in order.
#[derive(Debug, Default, Clone)]
pub struct SharedLog(Arc<Mutex<Vec<String>>>);

impl SharedLog {
    pub fn push(&self, sql: &str) {
        self.0.lock().expect("log lock poisoned").push(sql.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("log lock poisoned").clone()
    }
}

/// Queue of canned result sets, popped per query in FIFO order.
#[derive(Debug, Default, Clone)]
pub struct ResponseQueue(Arc<Mutex<VecDeque<Vec<Row>>>>);

impl ResponseQueue {
    pub fn enqueue(&self, rows: Vec<Row>) {
        self.0.lock().expect("response lock poisoned").push_back(rows);
    }

    fn pop(&self) -> Vec<Row> {
        self.0
            .lock()
            .expect("response lock poisoned")
            .pop_front()
            .unwrap_or_default()
    }
}

pub struct FakeConnection {
    log: SharedLog,
    responses: ResponseQueue,
    broken: Arc<AtomicBool>,
    execute_delay: Option<Duration>,
}

impl FakeConnection {
    pub fn broken_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.broken)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(
        &mut self,
        sql: &str,
        _params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if let Some(delay) = self.execute_delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
        self.log.push(sql);
        Ok(1)
    }

    async fn query(
        &mut self,
        sql: &str,
        _params: &[Value],
        _cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        self.log.push(sql);
        Ok(self.responses.pop())
    }

    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        let rows = self.query(sql, params, cancel).await?;
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }

    async fn ping(&mut self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Connection(ConnectionError::Broken));
        }
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}

/// Factory producing scripted connections; counts creations and can be
/// told to fail or stall.
#[derive(Default)]
pub struct FakeFactory {
    pub log: SharedLog,
    pub responses: ResponseQueue,
    created: AtomicUsize,
    fail_connects: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    execute_delay: Mutex<Option<Duration>>,
    last_broken: Mutex<Option<Arc<AtomicBool>>>,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Broken flag of the most recently created connection.
    pub fn last_broken_flag(&self) -> Arc<AtomicBool> {
        self.last_broken
            .lock()
            .expect("broken lock poisoned")
            .clone()
            .expect("a connection was created")
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock().expect("delay lock poisoned") = delay;
    }

    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        *self.execute_delay.lock().expect("delay lock poisoned") = delay;
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(Error::Connection(ConnectionError::Connect {
                source: "scripted connect failure".into(),
            }));
        }
        let delay = *self.connect_delay.lock().expect("delay lock poisoned");
        if let Some(delay) = delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        let broken = Arc::new(AtomicBool::new(false));
        *self.last_broken.lock().expect("broken lock poisoned") = Some(Arc::clone(&broken));
        Ok(Box::new(FakeConnection {
            log: self.log.clone(),
            responses: self.responses.clone(),
            broken,
            execute_delay: *self.execute_delay.lock().expect("delay lock poisoned"),
        }))
    }
}

/// Shareable handle so tests keep counters after the pool takes ownership.
#[derive(Clone)]
pub struct FactoryHandle(pub Arc<FakeFactory>);

#[async_trait]
impl ConnectionFactory for FactoryHandle {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>> {
        self.0.connect(cancel).await
    }
}

/// Builds a row from `(column, value)` pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    let columns: Arc<[String]> = pairs.iter().map(|(name, _)| name.to_string()).collect();
    let values = pairs.iter().map(|(_, value)| value.clone()).collect();
    Row::new(columns, values)
}
