//! Bounded connection pool with FIFO acquisition queueing, acquire-time
//! validation, lazy idle eviction, and disposal.
//!
//! One mutex guards the idle set, the counters, and the waiter queue.
//! Hand-off to a waiter moves the connection directly into the waiter's
//! channel; it never passes through the idle set, so no third party can
//! steal it between release and wake-up.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::driver::{Connection, ConnectionFactory};
use crate::error::{Error, Result};

const POOL_RESOURCE: &str = "connection pool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub validate_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            validate_on_acquire: false,
        }
    }
}

impl PoolConfig {
    /// Pool bounds lifted from the shared connection configuration.
    #[must_use]
    pub fn from_connection_config(config: &ConnectionConfig) -> Self {
        let mut pool_config = Self::default();
        if let Some(min) = config.min_pool_size {
            pool_config.min_size = min as usize;
        }
        if let Some(max) = config.max_pool_size {
            pool_config.max_size = max as usize;
        }
        if let Some(idle) = config.idle_timeout {
            pool_config.idle_timeout = idle;
        }
        if let Some(timeout) = config.connection_timeout {
            pool_config.acquire_timeout = timeout;
        }
        pool_config
    }
}

/// Counters snapshot for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub disposed: bool,
}

enum WaiterSignal {
    /// Direct hand-off of a released connection.
    Conn(Box<dyn Connection>),
    /// Capacity freed without a reusable connection; re-run the acquire
    /// step.
    Retry,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<WaiterSignal>,
}

struct IdleEntry {
    conn: Box<dyn Connection>,
    since: Instant,
}

struct PoolState {
    idle: Vec<IdleEntry>,
    in_use: usize,
    waiters: VecDeque<Waiter>,
    next_waiter: u64,
    disposed: bool,
}

struct PoolInner {
    dialect: Arc<dyn Dialect>,
    factory: Box<dyn ConnectionFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    #[must_use]
    pub fn new(
        dialect: Arc<dyn Dialect>,
        factory: Box<dyn ConnectionFactory>,
        config: PoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                dialect,
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    in_use: 0,
                    waiters: VecDeque::new(),
                    next_waiter: 0,
                    disposed: false,
                }),
            }),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.inner.dialect)
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock_state();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.in_use,
            waiting: state.waiters.len(),
            disposed: state.disposed,
        }
    }

    /// Acquires a connection: idle reuse first, then creation below
    /// `max_size`, otherwise FIFO waiting until a release, the acquire
    /// timeout, or cancellation.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.acquire_timeout;

        loop {
            let attempt = self.try_acquire_or_enqueue()?;
            let (waiter_id, mut rx) = match attempt {
                Attempt::Ready(conn) => return self.validated(conn, cancel).await,
                Attempt::Create => match self.create_connection(cancel).await {
                    Ok(conn) => return Ok(self.guard(conn)),
                    Err(error) => return Err(error),
                },
                Attempt::Wait { id, rx } => (id, rx),
            };

            tokio::select! {
                signal = &mut rx => match signal {
                    Ok(WaiterSignal::Conn(conn)) => return self.validated(conn, cancel).await,
                    Ok(WaiterSignal::Retry) => continue,
                    Err(_) => return Err(Error::Disposed { resource: POOL_RESOURCE }),
                },
                () = tokio::time::sleep_until(deadline.into()) => {
                    if let Some(conn) = self.abandon_waiter(waiter_id, &mut rx) {
                        // A connection arrived just as the deadline fired.
                        return self.validated(conn, cancel).await;
                    }
                    return Err(Error::Timeout { after: self.inner.config.acquire_timeout });
                },
                () = cancel.cancelled() => {
                    if let Some(conn) = self.abandon_waiter(waiter_id, &mut rx) {
                        // A connection raced into the channel; give it back.
                        self.inner.release(conn);
                    }
                    return Err(Error::Cancelled);
                },
            }
        }
    }

    /// Closes connections idle beyond the timeout, never dropping the pool
    /// below `min_size`.
    pub fn reap_idle(&self) {
        let mut state = self.inner.lock_state();
        let cutoff = self.inner.config.idle_timeout;
        let min_size = self.inner.config.min_size;
        let mut kept = Vec::with_capacity(state.idle.len());
        let mut total = state.in_use + state.idle.len();
        for entry in state.idle.drain(..) {
            if total > min_size && entry.since.elapsed() >= cutoff {
                debug!(pool.idle_evicted = true, "closing idle connection");
                total -= 1;
            } else {
                kept.push(entry);
            }
        }
        state.idle = kept;
    }

    /// Rejects new acquirers, drains idle connections, and signals waiters.
    pub fn dispose(&self) {
        let mut state = self.inner.lock_state();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.idle.clear();
        state.waiters.clear();
        debug!("connection pool disposed");
    }

    fn guard(&self, conn: Box<dyn Connection>) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::downgrade(&self.inner),
        }
    }

    fn try_acquire_or_enqueue(&self) -> Result<Attempt> {
        let mut state = self.inner.lock_state();
        if state.disposed {
            return Err(Error::Disposed {
                resource: POOL_RESOURCE,
            });
        }

        self.reap_idle_locked(&mut state);

        if let Some(entry) = state.idle.pop() {
            state.in_use += 1;
            return Ok(Attempt::Ready(entry.conn));
        }

        if state.in_use + state.idle.len() < self.inner.config.max_size {
            state.in_use += 1;
            return Ok(Attempt::Create);
        }

        let (tx, rx) = oneshot::channel();
        let id = state.next_waiter;
        state.next_waiter += 1;
        state.waiters.push_back(Waiter { id, tx });
        Ok(Attempt::Wait { id, rx })
    }

    fn reap_idle_locked(&self, state: &mut MutexGuard<'_, PoolState>) {
        let cutoff = self.inner.config.idle_timeout;
        let min_size = self.inner.config.min_size;
        let mut total = state.in_use + state.idle.len();
        state.idle.retain(|entry| {
            if total > min_size && entry.since.elapsed() >= cutoff {
                total -= 1;
                false
            } else {
                true
            }
        });
    }

    async fn create_connection(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>> {
        match self.inner.factory.connect(cancel).await {
            Ok(conn) => {
                debug!("created pooled connection");
                Ok(conn)
            }
            Err(error) => {
                self.inner.free_capacity();
                Err(error)
            }
        }
    }

    async fn validated(
        &self,
        mut conn: Box<dyn Connection>,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection> {
        if self.inner.config.validate_on_acquire && conn.ping().await.is_err() {
            warn!("idle connection failed validation; replacing");
            drop(conn);
            let replacement = self.create_connection(cancel).await?;
            return Ok(self.guard(replacement));
        }
        Ok(self.guard(conn))
    }

    /// Unlinks an abandoned waiter. When the waiter was already satisfied,
    /// the pending signal is drained: a handed-off connection is returned
    /// to the caller, and a consumed retry signal is forwarded to the next
    /// waiter so freed capacity is not lost.
    fn abandon_waiter(
        &self,
        id: u64,
        rx: &mut oneshot::Receiver<WaiterSignal>,
    ) -> Option<Box<dyn Connection>> {
        {
            let mut state = self.inner.lock_state();
            if let Some(position) = state.waiters.iter().position(|waiter| waiter.id == id) {
                state.waiters.remove(position);
                return None;
            }
        }

        match rx.try_recv() {
            Ok(WaiterSignal::Conn(conn)) => Some(conn),
            Ok(WaiterSignal::Retry) => {
                self.inner.wake_one_retry();
                None
            }
            Err(_) => None,
        }
    }
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Attempt {
    Ready(Box<dyn Connection>),
    Create,
    Wait {
        id: u64,
        rx: oneshot::Receiver<WaiterSignal>,
    },
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state lock poisoned")
    }

    /// Returns a connection after use. Hands it to the head waiter when one
    /// exists, pools it otherwise, and closes it when the pool is disposed
    /// or the connection is broken.
    fn release(&self, conn: Box<dyn Connection>) {
        let mut state = self.lock_state();

        if state.disposed || conn.is_broken() {
            if conn.is_broken() {
                warn!("discarding broken connection");
            }
            state.in_use = state.in_use.saturating_sub(1);
            let waiter = state.waiters.pop_front();
            drop(state);
            drop(conn);
            if let Some(waiter) = waiter {
                let _ = waiter.tx.send(WaiterSignal::Retry);
            }
            return;
        }

        let mut conn = conn;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(WaiterSignal::Conn(conn)) {
                // `in_use` is unchanged: the connection moved from one
                // holder to the next without touching the idle set.
                Ok(()) => return,
                Err(WaiterSignal::Conn(returned)) => conn = returned,
                Err(WaiterSignal::Retry) => unreachable!("release only sends connections"),
            }
        }

        state.in_use = state.in_use.saturating_sub(1);
        state.idle.push(IdleEntry {
            conn,
            since: Instant::now(),
        });
    }

    /// Frees a reserved capacity slot after a failed create or a discarded
    /// connection, waking one waiter to retry.
    fn free_capacity(&self) {
        let mut state = self.lock_state();
        state.in_use = state.in_use.saturating_sub(1);
        if let Some(waiter) = state.waiters.pop_front() {
            let _ = waiter.tx.send(WaiterSignal::Retry);
        }
    }

    /// Forwards a consumed retry signal to the next waiter in line.
    fn wake_one_retry(&self) {
        let mut state = self.lock_state();
        if let Some(waiter) = state.waiters.pop_front() {
            let _ = waiter.tx.send(WaiterSignal::Retry);
        }
    }
}

/// A connection on loan from the pool; returns on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Weak<PoolInner>,
}

impl PooledConnection {
    /// Detaches the connection from pool bookkeeping; the capacity slot is
    /// freed immediately and the connection closes on drop.
    #[must_use]
    pub fn detach(mut self) -> Box<dyn Connection> {
        let conn = self.conn.take().expect("connection already taken");
        if let Some(pool) = self.pool.upgrade() {
            pool.free_capacity();
        }
        conn
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn.is_some())
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("pooled connection accessed after detach")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("pooled connection accessed after detach")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let (Some(conn), Some(pool)) = (self.conn.take(), self.pool.upgrade()) {
            pool.release(conn);
        }
    }
}
