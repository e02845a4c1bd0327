//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (body size, header count)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Pass to upstream
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any limit breach
//! - No trust in client-supplied hop-by-hop headers

pub mod headers;
pub mod limits;
