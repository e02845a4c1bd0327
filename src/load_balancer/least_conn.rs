//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

/// Least connections selector.
/// Selects the upstream with the minimum number of outstanding leases.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, candidates: &[Arc<Upstream>]) -> Option<Arc<Upstream>> {
        // Ties go to the first candidate in snapshot order.
        candidates
            .iter()
            .min_by_key(|u| u.active_connections())
            .cloned()
    }
}
