//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → upstream_group identified
//!     → registry.rs (snapshot of healthy upstreams in the group)
//!     → selector.rs (group's policy state)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through upstreams)
//!         - weighted_random.rs (seeded, weight-proportional)
//!         - least_conn.rs (pick upstream with fewest leases)
//!     → Selected upstream, or NoHealthyUpstream
//! ```
//!
//! # Design Decisions
//! - Balancers see only the healthy candidates; health filtering is the
//!   registry's job
//! - Selection is deterministic for a given snapshot and policy state
//! - One balancer per upstream group, preserved across reloads while the
//!   policy is unchanged

use std::sync::Arc;

pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod selector;
pub mod upstream;
pub mod weighted_random;

pub use registry::{RegistryError, UpstreamRegistry};
pub use selector::Selector;
pub use upstream::Upstream;

/// A selection policy over a snapshot of healthy upstreams.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one candidate, or `None` if there is nothing to pick.
    fn select(&self, candidates: &[Arc<Upstream>]) -> Option<Arc<Upstream>>;
}
