//! Connection leases.

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use crate::load_balancer::upstream::{LeaseGuard, Upstream};
use crate::pool::{ConnectionPool, Connector};

/// A pooled connection borrowed by exactly one request.
///
/// While the lease exists the upstream's `active_connections` includes it and
/// one pool slot is taken. Dropping a lease without [`Lease::release`]
/// closes the connection.
pub struct Lease<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    conn: Option<C::Connection>,
    guard: LeaseGuard,
    _slot: OwnedSemaphorePermit,
    acquired_at: Instant,
    reused: bool,
}

impl<C: Connector> Lease<C> {
    pub(crate) fn new(
        pool: Arc<ConnectionPool<C>>,
        guard: LeaseGuard,
        slot: OwnedSemaphorePermit,
        conn: C::Connection,
        reused: bool,
    ) -> Self {
        Self {
            pool,
            conn: Some(conn),
            guard,
            _slot: slot,
            acquired_at: Instant::now(),
            reused,
        }
    }

    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.guard
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// True if the connection came from the idle list.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn connection(&self) -> Option<&C::Connection> {
        self.conn.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut C::Connection> {
        self.conn.as_mut()
    }

    pub(crate) fn take_connection(&mut self) -> Option<C::Connection> {
        self.conn.take()
    }

    /// Give the lease back to its pool.
    pub fn release(self, healthy: bool) {
        let pool = self.pool.clone();
        pool.release(self, healthy);
    }
}

impl<C: Connector> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("upstream", &self.guard.id)
            .field("reused", &self.reused)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(
                upstream = %self.guard.id,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Lease dropped without release; closing connection"
            );
            self.pool.put_back(conn, false);
        }
    }
}
