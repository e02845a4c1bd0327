//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Check every upstream concurrently
//!     → Upstream::record_check (state.rs thresholds)
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy, with thresholds to prevent flapping
//!     Draining set and cleared by operators only
//! ```

pub mod active;
pub mod state;

pub use active::HealthChecker;
pub use state::{HealthState, CheckOutcome, Thresholds};
