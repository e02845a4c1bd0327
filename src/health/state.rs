//! Upstream health state machine.
//!
//! # States
//! - Healthy: upstream receives new traffic
//! - Unhealthy: upstream excluded from load balancing
//! - Draining: operator-initiated; no new traffic, existing leases finish
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive check failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive check successes >= healthy_threshold
//! * → Draining, Draining → Healthy: operator action only
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Checks never touch a Draining upstream
//! - Transitions are compare-and-swap, so they are linearizable per upstream

use serde::Serialize;

/// Health of a single upstream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy = 0,
    Unhealthy = 1,
    Draining = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Unhealthy,
            2 => HealthState::Draining,
            _ => HealthState::Healthy,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Success,
    Failure,
}

/// A state change produced by a check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthState,
    pub to: HealthState,
}

/// Check thresholds taken from the health check configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub unhealthy: u32,
    pub healthy: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            unhealthy: 3,
            healthy: 1,
        }
    }
}

impl From<&crate::config::HealthCheckConfig> for Thresholds {
    fn from(config: &crate::config::HealthCheckConfig) -> Self {
        Self {
            unhealthy: config.unhealthy_threshold.max(1),
            healthy: config.healthy_threshold.max(1),
        }
    }
}
