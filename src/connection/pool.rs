use super::Connector;
use super::config::ConnectionConfig;
use crate::core::{DbError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

/// Connection pool
///
/// Hands out at most `max_connections` connections at a time. Idle
/// connections are reused until they exceed `idle_timeout` or `max_lifetime`;
/// connections returned in an unknown state are closed instead of reused.
pub struct ConnectionPool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

struct PoolShared<C: Connector> {
    config: ConnectionConfig,
    connector: C,
    /// Available connections
    idle: Mutex<VecDeque<PooledConnection<C::Connection>>>,
    /// One permit per connection that may be checked out
    slots: Arc<Semaphore>,
    counters: PoolCounters,
    closed: AtomicBool,
}

#[derive(Default)]
struct PoolCounters {
    /// Open connections, idle or checked out
    total: AtomicUsize,
    wait_count: AtomicU64,
    wait_nanos: AtomicU64,
    closed_idle: AtomicU64,
    closed_lifetime: AtomicU64,
}

/// A connection from the pool
struct PooledConnection<T> {
    connection: T,
    created_at: Instant,
    last_used: Instant,
}

impl<T> PooledConnection<T> {
    fn new(connection: T) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        if let Some(lifetime) = max_lifetime {
            self.created_at.elapsed() > lifetime
        } else {
            false
        }
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        if let Some(timeout) = idle_timeout {
            self.last_used.elapsed() > timeout
        } else {
            false
        }
    }

    fn refresh_last_used(&mut self) {
        self.last_used = Instant::now();
    }
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool. No connection is opened until one is requested or
    /// [`warm_up`](Self::warm_up) is called.
    pub fn new(connector: C, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let slots = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                connector,
                idle: Mutex::new(VecDeque::new()),
                slots,
                counters: PoolCounters::default(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Open connections until `min_connections` are idle or checked out.
    pub async fn warm_up(&self) -> Result<()> {
        let counters = &self.shared.counters;
        while counters.total.load(Ordering::SeqCst) < self.shared.config.min_connections {
            let connection = self.shared.connector.connect().await?;
            counters.total.fetch_add(1, Ordering::SeqCst);
            self.shared
                .idle
                .lock()?
                .push_back(PooledConnection::new(connection));
        }
        Ok(())
    }

    /// Get a connection from the pool
    pub async fn get(&self) -> Result<PoolGuard<C>> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let permit = self.acquire_slot().await?;

        if let Some(mut pooled) = self.try_get_available()? {
            pooled.refresh_last_used();
            return Ok(self.guard(pooled, permit));
        }

        let connection = self.shared.connector.connect().await?;
        self.shared.counters.total.fetch_add(1, Ordering::SeqCst);
        Ok(self.guard(PooledConnection::new(connection), permit))
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        match Arc::clone(&self.shared.slots).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(DbError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let counters = &self.shared.counters;
        counters.wait_count.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let timeout = self.shared.config.connect_timeout;
        let acquired =
            tokio::time::timeout(timeout, Arc::clone(&self.shared.slots).acquire_owned()).await;
        let waited = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        counters.wait_nanos.fetch_add(waited, Ordering::Relaxed);

        match acquired {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(DbError::PoolClosed),
            Err(_) => Err(DbError::PoolTimeout(timeout)),
        }
    }

    /// Try to get an available connection from the pool
    fn try_get_available(&self) -> Result<Option<PooledConnection<C::Connection>>> {
        let config = &self.shared.config;
        let counters = &self.shared.counters;
        let mut idle = self.shared.idle.lock()?;

        while let Some(pooled) = idle.pop_front() {
            if pooled.is_expired(config.max_lifetime) {
                counters.closed_lifetime.fetch_add(1, Ordering::Relaxed);
            } else if pooled.is_idle_too_long(config.idle_timeout) {
                counters.closed_idle.fetch_add(1, Ordering::Relaxed);
            } else if self.shared.connector.is_broken(&pooled.connection) {
                // closed by the server; not counted as idle or lifetime expiry
            } else {
                return Ok(Some(pooled));
            }
            counters.total.fetch_sub(1, Ordering::SeqCst);
        }

        Ok(None)
    }

    fn guard(
        &self,
        pooled: PooledConnection<C::Connection>,
        permit: OwnedSemaphorePermit,
    ) -> PoolGuard<C> {
        PoolGuard {
            connection: Some(pooled),
            shared: Arc::clone(&self.shared),
            reusable: true,
            _permit: permit,
        }
    }

    /// Close the pool: idle connections are dropped now, checked-out ones
    /// when their guards are released, and further `get` calls fail.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.slots.close();
        if let Ok(mut idle) = self.shared.idle.lock() {
            let dropped = idle.len();
            idle.clear();
            self.shared
                .counters
                .total
                .fetch_sub(dropped, Ordering::SeqCst);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        let counters = &self.shared.counters;
        let total = counters.total.load(Ordering::SeqCst);

        PoolStats {
            max_connections: self.shared.config.max_connections,
            total_connections: total,
            idle_connections: idle,
            in_use_connections: total.saturating_sub(idle),
            wait_count: counters.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_nanos(counters.wait_nanos.load(Ordering::Relaxed)),
            closed_idle: counters.closed_idle.load(Ordering::Relaxed),
            closed_lifetime: counters.closed_lifetime.load(Ordering::Relaxed),
        }
    }
}

impl<C: Connector> PoolShared<C> {
    fn release(&self, mut pooled: PooledConnection<C::Connection>, reusable: bool) {
        let keep = reusable
            && !self.closed.load(Ordering::SeqCst)
            && !self.connector.is_broken(&pooled.connection);

        if keep {
            if let Ok(mut idle) = self.idle.lock() {
                pooled.refresh_last_used();
                idle.push_back(pooled);
                return;
            }
        }
        self.counters.total.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: usize,
    pub total_connections: usize,
    pub idle_connections: usize,
    pub in_use_connections: usize,
    /// Number of `get` calls that had to wait for a slot
    pub wait_count: u64,
    pub wait_duration: Duration,
    pub closed_idle: u64,
    pub closed_lifetime: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} in use, {} idle, max {}, {} waits",
            self.in_use_connections,
            self.total_connections,
            self.idle_connections,
            self.max_connections,
            self.wait_count
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped, unless it was marked
/// not reusable (for example because a transaction on it never finished).
pub struct PoolGuard<C: Connector> {
    connection: Option<PooledConnection<C::Connection>>,
    shared: Arc<PoolShared<C>>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PoolGuard<C> {
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }
}

impl<C: Connector> Deref for PoolGuard<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            Some(pooled) => &pooled.connection,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl<C: Connector> DerefMut for PoolGuard<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            Some(pooled) => &mut pooled.connection,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl<C: Connector> Drop for PoolGuard<C> {
    fn drop(&mut self) {
        if let Some(pooled) = self.connection.take() {
            self.shared.release(pooled, self.reusable);
        }
    }
}
