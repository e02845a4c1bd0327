//! HTTP API gateway library.
//!
//! A reverse proxy that routes requests by path, host and headers to
//! groups of upstream servers, with pooled connections, admission control,
//! active health checking and live configuration reload.

pub mod admin;
pub mod admission;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::{Gateway, HttpServer};
pub use lifecycle::Shutdown;
