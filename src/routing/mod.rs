//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched RouteRule or no match (404)
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile matchers and header rewrites
//!     → Freeze as immutable Router, swapped in atomically
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{HeaderRewrites, RouteRule, Router};
