//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, accept limit).
    pub listener: ListenerConfig,

    /// Route rules mapping requests to upstream groups.
    pub routes: Vec<RouteConfig>,

    /// Upstream server definitions.
    pub upstreams: Vec<UpstreamConfig>,

    /// Per-group load balancing policy. Groups not listed use round-robin.
    pub groups: Vec<GroupConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Upstream connection pool settings.
    pub pool: PoolConfig,

    /// Admission control and queueing.
    pub admission: AdmissionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Request size and streaming limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Control endpoint settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (accept backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// A header that must be present (and optionally equal a value) for a route to match.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderMatchConfig {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Route configuration mapping requests to an upstream group.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path prefix to match. Longest matching prefix wins.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Host header to match (case-insensitive, port ignored).
    #[serde(default)]
    pub host: Option<String>,

    /// Additional header predicates, all of which must hold.
    #[serde(default)]
    pub headers: Vec<HeaderMatchConfig>,

    /// Upstream group to forward to.
    pub upstream_group: String,

    /// Headers set (overwritten) on the forwarded request.
    #[serde(default)]
    pub set_headers: BTreeMap<String, String>,

    /// Headers removed from the forwarded request.
    #[serde(default)]
    pub remove_headers: Vec<String>,

    /// Per-route deadline; falls back to `timeouts.request_secs`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

/// Wire protocol spoken to an upstream.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    #[default]
    Http1,
    Http2,
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Unique upstream identifier.
    pub id: String,

    /// Group this upstream belongs to.
    #[serde(default = "default_group")]
    pub group: String,

    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Weight for weighted-random balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Protocol used for upstream connections.
    #[serde(default)]
    pub protocol: UpstreamProtocol,

    /// Maximum concurrent requests routed to this upstream.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_group() -> String {
    "default".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_max_in_flight() -> usize {
    100
}

/// Load balancing policy for an upstream group.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    #[default]
    RoundRobin,
    WeightedRandom,
    LeastConnections,
}

/// Policy binding for a named upstream group.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default)]
    pub policy: BalancePolicy,

    /// Seed for weighted-random selection, so runs are reproducible.
    #[serde(default)]
    pub seed: u64,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Check interval in seconds.
    pub interval_secs: u64,

    /// Check timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to request.
    pub path: String,

    /// Consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before marking healthy again.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 1,
        }
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent leases per upstream.
    pub max_connections_per_upstream: usize,

    /// How long `acquire` waits for a free slot, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// TCP connect + handshake timeout, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle connections older than this are closed by the reaper.
    pub idle_ttl_secs: u64,

    /// How often the reaper runs.
    pub reap_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_upstream: 100,
            acquire_timeout_ms: 1_000,
            connect_timeout_ms: 1_000,
            idle_ttl_secs: 60,
            reap_interval_secs: 10,
        }
    }
}

/// What to do with a request when every in-flight slot is taken.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait in a bounded FIFO queue until a slot frees or the deadline passes.
    #[default]
    Queue,
    /// Reject immediately with 503.
    Reject,
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Global bound on concurrent in-flight requests.
    pub max_in_flight: usize,

    /// Maximum number of requests waiting for a slot.
    pub queue_capacity: usize,

    /// Overflow behaviour.
    pub overflow: OverflowPolicy,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 500,
            queue_capacity: 1_000,
            overflow: OverflowPolicy::Queue,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default request deadline in seconds, for routes without `timeout_ms`.
    pub request_secs: u64,

    /// How long shutdown waits for in-flight connections before forcing close.
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_ms: 1_000,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries of transient connect failures.
    pub enabled: bool,

    /// Retries allowed per request, each against a different upstream.
    pub max_connect_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connect_retries: 1,
        }
    }
}

/// Request size and streaming limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Largest body chunk forwarded in one piece, in bytes.
    pub max_chunk_bytes: usize,

    /// Maximum number of request headers.
    pub max_header_count: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
            max_chunk_bytes: 16 * 1024,
            max_header_count: 100,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Control endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the control endpoint.
    pub enabled: bool,

    /// Optional bearer token required on every admin request.
    pub api_key: Option<String>,

    /// Control endpoint bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.health_check.interval_secs, 5);
        assert_eq!(config.health_check.timeout_ms, 2_000);
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.health_check.healthy_threshold, 1);
        assert_eq!(config.pool.max_connections_per_upstream, 100);
        assert_eq!(config.admission.max_in_flight, 500);
        assert_eq!(config.admission.queue_capacity, 1_000);
        assert_eq!(config.timeouts.shutdown_grace_ms, 1_000);
    }

    #[test]
    fn parses_minimal_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[upstreams]]
            id = "api-1"
            group = "api"
            address = "127.0.0.1:3000"

            [[upstreams]]
            id = "api-2"
            group = "api"
            address = "127.0.0.1:3001"
            weight = 3
            protocol = "http2"

            [[groups]]
            name = "api"
            policy = "least_connections"

            [[routes]]
            name = "api"
            path_prefix = "/api"
            upstream_group = "api"
            timeout_ms = 1500
            set_headers = { "x-gateway" = "edge" }

            [admission]
            overflow = "reject"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstreams.len(), 2);
        assert_eq!(config.upstreams[0].weight, 1);
        assert_eq!(config.upstreams[1].protocol, UpstreamProtocol::Http2);
        assert_eq!(config.groups[0].policy, BalancePolicy::LeastConnections);
        assert_eq!(config.routes[0].timeout_ms, Some(1500));
        assert_eq!(config.routes[0].set_headers["x-gateway"], "edge");
        assert_eq!(config.admission.overflow, OverflowPolicy::Reject);
        // untouched sections keep defaults
        assert_eq!(config.admission.max_in_flight, 500);
    }
}
