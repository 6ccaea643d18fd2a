//! Bounded connection pool.
//!
//! # Responsibilities
//! - Reuse idle sessions after validating them
//! - Enforce `max_connections` live sessions per pool
//! - Wait a bounded time for capacity, then fail with `PoolExhausted`
//!
//! # Design Decisions
//! - Capacity is a semaphore permit owned by each live connection, idle or checked out
//! - The idle-queue mutex is held only to push or pop; validation and connecting happen outside it
//! - Never acquire a circuit breaker lock while holding the pool lock (or the reverse)
//! - Dropping a checked-out connection without `release` discards it

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::ControlError;
use crate::net::connection::Connection;
use crate::net::endpoint::Endpoint;
use crate::observability::metrics;
use crate::resilience::timeouts::Timeouts;

/// Creates and validates the connections a pool hands out.
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, ControlError>> + Send;

    /// Cheap, non-blocking liveness check.
    fn is_valid(&self, conn: &Self::Connection) -> bool;

    /// Label used in logs, metrics and errors.
    fn label(&self) -> &str;
}

/// Opens protocol sessions to one display.
#[derive(Debug)]
pub struct DeviceConnector {
    endpoint: Arc<Endpoint>,
    timeouts: Timeouts,
    label: String,
}

impl DeviceConnector {
    pub fn new(endpoint: Arc<Endpoint>, timeouts: Timeouts) -> Self {
        let label = endpoint.to_string();
        Self {
            endpoint,
            timeouts,
            label,
        }
    }
}

impl ConnectionManager for DeviceConnector {
    type Connection = Connection;

    fn connect(&self) -> impl Future<Output = Result<Connection, ControlError>> + Send {
        Connection::open(&self.endpoint, self.timeouts)
    }

    fn is_valid(&self, conn: &Connection) -> bool {
        conn.is_alive()
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long `get_connection` waits for capacity.
    pub connection_timeout: Duration,
    /// Idle sessions older than this are discarded instead of reused.
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 2,
            connection_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            min_connections: config.min_connections,
            max_connections: config.max_connections,
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }
}

/// A live connection and its bookkeeping.
struct PoolSlot<C> {
    connection: C,
    created_at: Instant,
    last_used_at: Instant,
    _permit: OwnedSemaphorePermit,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

struct Shared<M: ConnectionManager> {
    manager: M,
    settings: PoolSettings,
    idle: Mutex<VecDeque<PoolSlot<M::Connection>>>,
    capacity: Arc<Semaphore>,
    released: Notify,
    in_use: AtomicUsize,
}

impl<M: ConnectionManager> Shared<M> {
    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn push_idle(&self, slot: PoolSlot<M::Connection>) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(slot);
        self.released.notify_one();
    }

    fn pop_idle(&self) -> Option<PoolSlot<M::Connection>> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back()
    }

    /// Destroy a slot, freeing its capacity.
    fn discard(&self, slot: PoolSlot<M::Connection>, reason: &str) {
        tracing::debug!(
            endpoint = %self.manager.label(),
            reason,
            age_ms = slot.created_at.elapsed().as_millis() as u64,
            "Discarding pooled connection"
        );
        drop(slot);
        self.released.notify_one();
        self.record();
    }

    fn stats(&self) -> PoolStats {
        let max = self.settings.max_connections;
        PoolStats {
            total: max - self.capacity.available_permits(),
            idle: self.idle_len(),
            in_use: self.in_use.load(Ordering::SeqCst),
            max,
        }
    }

    fn record(&self) {
        let stats = self.stats();
        metrics::record_pool(self.manager.label(), stats.total, stats.idle, stats.in_use);
    }
}

/// Bounded pool of connections to one endpoint.
pub struct ConnectionPool<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.label())
            .field("settings", &self.shared.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    pub fn new(manager: M, settings: PoolSettings) -> Self {
        let max = settings.max_connections.max(1);
        let settings = PoolSettings {
            max_connections: max,
            min_connections: settings.min_connections.min(max),
            ..settings
        };

        Self {
            shared: Arc::new(Shared {
                manager,
                settings,
                idle: Mutex::new(VecDeque::with_capacity(max)),
                capacity: Arc::new(Semaphore::new(max)),
                released: Notify::new(),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Eagerly open `min_connections`. Failures are logged, not fatal.
    pub async fn initialize(&self) {
        let shared = &self.shared;
        for _ in shared.stats().total..shared.settings.min_connections {
            let Ok(permit) = Arc::clone(&shared.capacity).try_acquire_owned() else {
                break;
            };
            match tokio::time::timeout(shared.settings.connection_timeout, shared.manager.connect())
                .await
            {
                Ok(Ok(connection)) => {
                    let now = Instant::now();
                    shared.push_idle(PoolSlot {
                        connection,
                        created_at: now,
                        last_used_at: now,
                        _permit: permit,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(endpoint = %shared.manager.label(), error = %e, "Pool warm-up connection failed");
                }
                Err(_) => {
                    tracing::warn!(endpoint = %shared.manager.label(), "Pool warm-up connection timed out");
                }
            }
        }
        shared.record();
    }

    /// Check out a validated connection, waiting up to `connection_timeout`.
    pub async fn get_connection(&self) -> Result<PooledConnection<M>, ControlError> {
        let shared = &self.shared;
        let started = Instant::now();
        let deadline = started + shared.settings.connection_timeout;

        loop {
            while let Some(mut slot) = shared.pop_idle() {
                if slot.last_used_at.elapsed() > shared.settings.idle_timeout {
                    shared.discard(slot, "idle timeout");
                } else if !shared.manager.is_valid(&slot.connection) {
                    shared.discard(slot, "failed validation");
                } else {
                    slot.last_used_at = Instant::now();
                    return Ok(self.check_out(slot));
                }
            }

            if let Ok(permit) = Arc::clone(&shared.capacity).try_acquire_owned() {
                return self.open(permit, deadline).await;
            }

            tracing::trace!(endpoint = %shared.manager.label(), "Pool at capacity, waiting for a release");
            if tokio::time::timeout_at(deadline, shared.released.notified())
                .await
                .is_err()
            {
                tracing::warn!(
                    endpoint = %shared.manager.label(),
                    max_connections = shared.settings.max_connections,
                    "Connection pool exhausted"
                );
                metrics::record_pool_exhausted(shared.manager.label());
                return Err(ControlError::PoolExhausted {
                    endpoint: shared.manager.label().to_string(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    async fn open(
        &self,
        permit: OwnedSemaphorePermit,
        deadline: Instant,
    ) -> Result<PooledConnection<M>, ControlError> {
        let shared = &self.shared;
        let connected = tokio::time::timeout_at(deadline, shared.manager.connect()).await;
        let connection = match connected {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                drop(permit);
                shared.released.notify_one();
                return Err(e);
            }
            Err(_) => {
                drop(permit);
                shared.released.notify_one();
                return Err(ControlError::timeout(
                    shared.manager.label(),
                    "connect",
                    shared.settings.connection_timeout,
                ));
            }
        };

        let now = Instant::now();
        Ok(self.check_out(PoolSlot {
            connection,
            created_at: now,
            last_used_at: now,
            _permit: permit,
        }))
    }

    fn check_out(&self, slot: PoolSlot<M::Connection>) -> PooledConnection<M> {
        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        self.shared.record();
        PooledConnection {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return a connection for reuse. Invalid connections are discarded.
    pub fn release(&self, mut conn: PooledConnection<M>) {
        let Some(mut slot) = conn.slot.take() else {
            return;
        };
        let shared = &conn.shared;
        shared.in_use.fetch_sub(1, Ordering::SeqCst);

        if shared.manager.is_valid(&slot.connection) {
            slot.last_used_at = Instant::now();
            shared.push_idle(slot);
            shared.record();
        } else {
            shared.discard(slot, "failed validation on release");
        }
    }

    /// Drop idle connections past `idle_timeout` or failing validation.
    pub fn reap_idle(&self) -> usize {
        let shared = &self.shared;
        let drained: Vec<_> = shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut reaped = 0;
        for slot in drained {
            if slot.last_used_at.elapsed() > shared.settings.idle_timeout
                || !shared.manager.is_valid(&slot.connection)
            {
                shared.discard(slot, "reaped");
                reaped += 1;
            } else {
                shared.push_idle(slot);
            }
        }
        reaped
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    pub fn label(&self) -> &str {
        self.shared.manager.label()
    }
}

/// A checked-out connection. Exclusively owned until released or dropped.
pub struct PooledConnection<M: ConnectionManager> {
    slot: Option<PoolSlot<M::Connection>>,
    shared: Arc<Shared<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// When the underlying connection was opened.
    pub fn created_at(&self) -> Option<Instant> {
        self.slot.as_ref().map(|s| s.created_at)
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.slot {
            Some(slot) => &slot.connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.slot {
            Some(slot) => &mut slot.connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.in_use.fetch_sub(1, Ordering::SeqCst);
            self.shared.discard(slot, "dropped without release");
        }
    }
}
