//! Upstream connection pooling.
//!
//! # Data Flow
//! ```text
//! Upstream selected
//!     → PoolManager::acquire(upstream)
//!     → ConnectionPool (per upstream): wait for a lease slot
//!         → reuse an idle, still-open connection (LIFO)
//!         → or dial a new one through the Connector
//!     → Lease (counts against upstream.active_connections)
//!     → request/response forwarded on the leased connection
//!     → release(lease, healthy): back to idle, or closed
//!
//! Background:
//!     reaper → closes idle connections older than the TTL
//! ```
//!
//! # Design Decisions
//! - The lease slot semaphore bounds concurrent leases per upstream
//! - The idle list sits behind a std mutex that is never held across `.await`
//! - Dropping an unreleased lease discards its connection

pub mod connector;
pub mod lease;

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{self, Instant};

use crate::config::PoolConfig;
use crate::error::GatewayError;
use crate::load_balancer::upstream::Upstream;
use crate::observability::metrics;

pub use connector::{UpstreamConnection, UpstreamConnector};
pub use lease::Lease;

/// Dials transport connections to upstreams.
pub trait Connector: Send + Sync + 'static {
    type Connection: PooledConnection;

    fn connect(
        &self,
        upstream: &Upstream,
    ) -> impl Future<Output = Result<Self::Connection, GatewayError>> + Send;
}

/// A connection the pool can hand out again.
pub trait PooledConnection: Send + Unpin + 'static {
    /// False once the peer or the transport has closed the connection.
    fn is_open(&self) -> bool;
}

/// Pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub idle_ttl: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_connections: config.max_connections_per_upstream,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
        }
    }
}

struct IdleConnection<T> {
    conn: T,
    idle_since: Instant,
}

/// Point-in-time view of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub leased: usize,
    pub idle: usize,
    pub max: usize,
}

/// Bounded pool of connections to one upstream.
pub struct ConnectionPool<C: Connector> {
    upstream_id: String,
    addr: SocketAddr,
    settings: PoolSettings,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(upstream: &Upstream, settings: PoolSettings) -> Self {
        Self {
            upstream_id: upstream.id.clone(),
            addr: upstream.addr,
            settings,
            slots: Arc::new(Semaphore::new(settings.max_connections)),
            idle: Mutex::new(VecDeque::new()),
        }
    }

    pub fn upstream_id(&self) -> &str {
        &self.upstream_id
    }

    /// Borrow a connection, waiting at most until `deadline` or the acquire
    /// timeout, whichever comes first.
    pub async fn acquire(
        self: &Arc<Self>,
        upstream: &Arc<Upstream>,
        connector: &C,
        deadline: Instant,
    ) -> Result<Lease<C>, GatewayError> {
        let wait_until = deadline.min(Instant::now() + self.settings.acquire_timeout);
        let slot = match time::timeout_at(wait_until, self.slots.clone().acquire_owned()).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) | Err(_) => {
                metrics::record_lease(&self.upstream_id, "exhausted");
                if Instant::now() >= deadline {
                    return Err(acquire_deadline_exceeded());
                }
                return Err(GatewayError::PoolExhausted {
                    upstream: self.upstream_id.clone(),
                });
            }
        };

        if let Some(conn) = self.take_idle() {
            metrics::record_lease(&self.upstream_id, "reused");
            return Ok(Lease::new(self.clone(), upstream.track_lease(), slot, conn, true));
        }

        let remaining = wait_until.saturating_duration_since(Instant::now());
        let conn = match time::timeout(remaining.max(Duration::from_millis(1)), connector.connect(upstream)).await {
            Ok(result) => result?,
            Err(_) if Instant::now() >= deadline => return Err(acquire_deadline_exceeded()),
            Err(_) => {
                return Err(GatewayError::UpstreamConnectFailed {
                    upstream: self.upstream_id.clone(),
                    reason: "connect did not finish before the acquire deadline".into(),
                })
            }
        };
        metrics::record_lease(&self.upstream_id, "dialed");
        tracing::debug!(upstream = %self.upstream_id, addr = %self.addr, "Opened upstream connection");
        Ok(Lease::new(self.clone(), upstream.track_lease(), slot, conn, false))
    }

    /// Return a lease. Healthy, still-open connections go back to the idle
    /// list; everything else is closed.
    pub fn release(&self, mut lease: Lease<C>, healthy: bool) {
        if let Some(conn) = lease.take_connection() {
            self.put_back(conn, healthy);
        }
    }

    pub(crate) fn put_back(&self, conn: C::Connection, healthy: bool) {
        if healthy && conn.is_open() {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            if idle.len() < self.settings.max_connections {
                idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                metrics::record_lease(&self.upstream_id, "returned");
                return;
            }
        }
        metrics::record_lease(&self.upstream_id, "discarded");
    }

    // Most recently returned first; stale entries are dropped on the way.
    fn take_idle(&self) -> Option<C::Connection> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(entry) = idle.pop_back() {
            if entry.conn.is_open() && entry.idle_since.elapsed() < self.settings.idle_ttl {
                return Some(entry.conn);
            }
        }
        None
    }

    /// Close idle connections past the TTL or already closed by the peer.
    pub fn reap_idle(&self) -> usize {
        let ttl = self.settings.idle_ttl;
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let before = idle.len();
        idle.retain(|entry| entry.conn.is_open() && entry.idle_since.elapsed() < ttl);
        before - idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().unwrap_or_else(|e| e.into_inner()).len();
        PoolStats {
            leased: self.settings.max_connections - self.slots.available_permits(),
            idle,
            max: self.settings.max_connections,
        }
    }
}

/// All upstream pools plus the connector they share.
pub struct PoolManager<C: Connector> {
    connector: C,
    settings: PoolSettings,
    pools: DashMap<String, Arc<ConnectionPool<C>>>,
}

impl<C: Connector> PoolManager<C> {
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            pools: DashMap::new(),
        }
    }

    /// The pool for `upstream`, replacing it if the upstream moved address.
    pub fn pool_for(&self, upstream: &Upstream) -> Arc<ConnectionPool<C>> {
        let mut entry = self
            .pools
            .entry(upstream.id.clone())
            .or_insert_with(|| Arc::new(ConnectionPool::new(upstream, self.settings)));
        if entry.addr != upstream.addr {
            *entry = Arc::new(ConnectionPool::new(upstream, self.settings));
        }
        entry.clone()
    }

    pub async fn acquire(&self, upstream: &Arc<Upstream>, deadline: Instant) -> Result<Lease<C>, GatewayError> {
        let pool = self.pool_for(upstream);
        pool.acquire(upstream, &self.connector, deadline).await
    }

    pub fn release(&self, lease: Lease<C>, healthy: bool) {
        lease.release(healthy);
    }

    pub fn stats(&self, upstream_id: &str) -> Option<PoolStats> {
        self.pools.get(upstream_id).map(|p| p.stats())
    }

    /// Drop pools whose upstream is gone. Outstanding leases keep their pool
    /// alive until they are released.
    pub fn retain_upstreams(&self, ids: &[String]) {
        self.pools.retain(|id, _| ids.contains(id));
    }

    pub fn reap_idle(&self) -> usize {
        self.pools.iter().map(|p| p.reap_idle()).sum()
    }

    /// Run the idle reaper until shutdown.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = self.reap_idle();
                    if closed > 0 {
                        tracing::debug!(closed, "Reaped idle upstream connections");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// The request deadline ran out while waiting for a slot or a dial.
fn acquire_deadline_exceeded() -> GatewayError {
    GatewayError::DeadlineExceeded {
        stage: "acquiring connection",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory connection used to exercise the pool without sockets.
    #[derive(Debug)]
    pub struct FakeConnection {
        pub id: usize,
        pub open: Arc<AtomicBool>,
    }

    impl PooledConnection for FakeConnection {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeConnector {
        pub dialed: AtomicUsize,
        pub fail: AtomicBool,
        /// Dials never finish while set.
        pub hang: AtomicBool,
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self, upstream: &Upstream) -> Result<FakeConnection, GatewayError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::UpstreamConnectFailed {
                    upstream: upstream.id.clone(),
                    reason: "refused".into(),
                });
            }
            let id = self.dialed.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConnection {
                id,
                open: Arc::new(AtomicBool::new(true)),
            })
        }
    }
}
