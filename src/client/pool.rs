// ABOUTME: Pool of idle engine connections keyed by endpoint.
// ABOUTME: Decides reuse vs. new connection and reclaims connections after their idle timeout.

use super::connection::{Connection, ConnectionId};
use super::endpoint::Endpoint;
use super::error::Result;
use super::transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

struct IdleEntry {
    conn: Connection,
    expires_at: Instant,
}

/// Snapshot of pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently parked and available for reuse.
    pub idle: usize,
    /// Connections opened over the pool's lifetime.
    pub opened: u64,
}

/// Owner of every idle connection.
///
/// A connection is either parked here or held by exactly one caller or
/// subscription. Checkout removes it under the lock, so two holders can never
/// claim the same connection.
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    idle_timeout: Duration,
    max_idle_per_endpoint: usize,
    idle: Mutex<HashMap<Endpoint, Vec<IdleEntry>>>,
    opened: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        transport: Arc<dyn Transport>,
        idle_timeout: Duration,
        max_idle_per_endpoint: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            idle_timeout,
            max_idle_per_endpoint,
            idle: Mutex::new(HashMap::new()),
            opened: AtomicU64::new(0),
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Lease a connection for `endpoint`.
    ///
    /// Reuses the most recently parked live connection unless `force_new` is
    /// set. A `force_new` connection is closed rather than pooled on release.
    pub async fn acquire(&self, endpoint: &Endpoint, force_new: bool) -> Result<Connection> {
        if !force_new && let Some(conn) = self.checkout(endpoint) {
            tracing::debug!(connection = %conn.id(), "reusing pooled connection");
            return Ok(conn);
        }

        let mut conn = Connection::open(self.transport.as_ref(), endpoint).await?;
        conn.set_single_use(force_new);
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn checkout(&self, endpoint: &Endpoint) -> Option<Connection> {
        let mut idle = self.idle.lock();
        let entries = idle.get_mut(endpoint)?;
        let now = Instant::now();
        while let Some(entry) = entries.pop() {
            if entry.expires_at > now && entry.conn.is_live() {
                return Some(entry.conn);
            }
        }
        None
    }

    /// Return a connection after its exchange completed cleanly.
    ///
    /// Single-use, dead, or surplus connections are closed instead.
    /// `idle_timeout` overrides the pool default for this connection.
    pub fn release(self: &Arc<Self>, conn: Connection, idle_timeout: Option<Duration>) {
        if conn.is_single_use() || !conn.is_live() {
            return;
        }

        let idle_timeout = idle_timeout.unwrap_or(self.idle_timeout);
        let endpoint = conn.endpoint().clone();
        let id = conn.id();
        {
            let mut idle = self.idle.lock();
            let entries = idle.entry(endpoint).or_default();
            if entries.len() >= self.max_idle_per_endpoint {
                return;
            }
            entries.push(IdleEntry {
                conn,
                expires_at: Instant::now() + idle_timeout,
            });
        }
        tracing::debug!(connection = %id, ?idle_timeout, "parked connection");

        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(pool) = pool.upgrade() {
                pool.reap();
            }
        });
    }

    /// Close every parked connection whose idle window has passed.
    pub fn reap(&self) {
        let now = Instant::now();
        let mut idle = self.idle.lock();
        for entries in idle.values_mut() {
            entries.retain(|entry| entry.expires_at > now && entry.conn.is_live());
        }
        idle.retain(|_, entries| !entries.is_empty());
    }

    /// IDs of parked connections for `endpoint`, most recently parked last.
    pub fn idle_connections(&self, endpoint: &Endpoint) -> Vec<ConnectionId> {
        self.idle
            .lock()
            .get(endpoint)
            .map(|entries| entries.iter().map(|e| e.conn.id()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.lock().values().map(Vec::len).sum(),
            opened: self.opened.load(Ordering::Relaxed),
        }
    }
}
