//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limit)
//!     → Hand off to axum/hyper (HTTP/1.1 or h2c)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Plaintext only; TLS is terminated in front of the gateway

pub mod listener;

pub use listener::{BoundedListener, ClientAddr, ConnectionGauge};
