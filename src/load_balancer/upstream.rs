//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track active connections (outstanding leases) for least-connections
//! - Enforce the per-upstream in-flight bound
//! - Hold health state and apply check results

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{UpstreamConfig, UpstreamProtocol};
use crate::health::state::{HealthState, HealthTransition, CheckOutcome, Thresholds};

/// A single upstream server.
#[derive(Debug)]
pub struct Upstream {
    /// Unique identifier.
    pub id: String,
    /// Group the upstream is selected from.
    pub group: String,
    /// The address of the upstream.
    pub addr: SocketAddr,
    /// Weight for weighted-random selection.
    pub weight: u32,
    /// Protocol used on pooled connections.
    pub protocol: UpstreamProtocol,
    /// Maximum concurrent requests routed here.
    pub max_in_flight: usize,

    state: AtomicU8,
    active_connections: AtomicUsize,
    in_flight: AtomicUsize,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

impl Upstream {
    /// Create a healthy HTTP/1.1 upstream in the `default` group.
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            group: "default".to_string(),
            addr,
            weight: 1,
            protocol: UpstreamProtocol::Http1,
            max_in_flight: 100,
            state: AtomicU8::new(HealthState::Healthy as u8),
            active_connections: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        }
    }

    /// Build an upstream from its configuration.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, std::net::AddrParseError> {
        let addr = config.address.parse()?;
        Ok(Self {
            group: config.group.clone(),
            weight: config.weight,
            protocol: config.protocol,
            max_in_flight: config.max_in_flight,
            ..Self::new(config.id.clone(), addr)
        })
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// True when `config` describes this upstream without changes.
    pub fn matches_config(&self, config: &UpstreamConfig) -> bool {
        self.id == config.id
            && self.group == config.group
            && config.address.parse::<SocketAddr>().ok() == Some(self.addr)
            && self.weight == config.weight
            && self.protocol == config.protocol
            && self.max_in_flight == config.max_in_flight
    }

    /// Number of outstanding leases against this upstream.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Number of requests currently routed here.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Count a new lease. The count drops again when the guard is dropped.
    pub fn track_lease(self: &Arc<Self>) -> LeaseGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        LeaseGuard {
            upstream: self.clone(),
        }
    }

    /// Reserve an in-flight slot, or `None` when the upstream is saturated.
    pub fn try_reserve(self: &Arc<Self>) -> Option<InFlightPermit> {
        let mut prev = self.in_flight.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_in_flight {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(InFlightPermit {
            upstream: self.clone(),
        })
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::SeqCst))
    }

    /// Only healthy upstreams take new assignments.
    pub fn is_selectable(&self) -> bool {
        self.health() == HealthState::Healthy
    }

    /// Force a state (operator action). Returns the previous state.
    pub fn set_health(&self, state: HealthState) -> HealthState {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        HealthState::from(self.state.swap(state as u8, Ordering::SeqCst))
    }

    /// Return a draining upstream to service. Any other state is left alone.
    pub fn undrain(&self) -> Result<HealthTransition, HealthState> {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.state
            .compare_exchange(
                HealthState::Draining as u8,
                HealthState::Healthy as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| HealthTransition {
                from: HealthState::Draining,
                to: HealthState::Healthy,
            })
            .map_err(HealthState::from)
    }

        /// Apply a check result. Returns the transition if one happened.
    pub fn record_check(&self, outcome: CheckOutcome, thresholds: Thresholds) -> Option<HealthTransition> {
        match outcome {
            CheckOutcome::Success => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= thresholds.healthy {
                    self.transition(HealthState::Unhealthy, HealthState::Healthy)
                } else {
                    None
                }
            }
            CheckOutcome::Failure => {
                self.consecutive_successes.store(0, Ordering::SeqCst);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= thresholds.unhealthy {
                    self.transition(HealthState::Healthy, HealthState::Unhealthy)
                } else {
                    None
                }
            }
        }
    }

    // A concurrent drain wins over a health check: the CAS fails and nothing changes.
    fn transition(&self, from: HealthState, to: HealthState) -> Option<HealthTransition> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| HealthTransition { from, to })
    }
}

/// A RAII guard that keeps `active_connections` equal to outstanding leases.
#[derive(Debug)]
pub struct LeaseGuard {
    upstream: Arc<Upstream>,
}

impl Deref for LeaseGuard {
    type Target = Arc<Upstream>;
    fn deref(&self) -> &Self::Target {
        &self.upstream
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.upstream.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A per-upstream in-flight slot, released on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    upstream: Arc<Upstream>,
}

impl InFlightPermit {
    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.upstream
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.upstream.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
