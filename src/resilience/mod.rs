//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (every stage bounded by the request deadline)
//!     → On connect failure: retries.rs (retry against another upstream)
//! ```

pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::with_deadline;
