//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → applied to subsystems at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies routes/upstreams via atomic swaps
//!     → in-flight requests keep the snapshot they started with
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AdmissionConfig, BalancePolicy, GatewayConfig, GroupConfig, HeaderMatchConfig,
    HealthCheckConfig, ListenerConfig, LogFormat, ObservabilityConfig, OverflowPolicy,
    PoolConfig, RetryConfig, RouteConfig, SecurityConfig, TimeoutConfig, UpstreamConfig,
    UpstreamProtocol,
};
