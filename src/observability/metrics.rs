//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): terminal requests by method, status, reason
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_upstream_health` (gauge): 0=healthy, 1=unhealthy, 2=draining
//! - `gateway_admission_queue_depth` (gauge): requests waiting for admission
//! - `gateway_in_flight` (gauge): admitted requests
//! - `gateway_pool_leases_total` (counter): lease events by upstream and outcome
//! - `gateway_config_reloads_total` (counter): reload attempts by result
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users and
//!   tests pay nothing
//! - The Prometheus exporter serves its own scrape endpoint

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

use crate::health::state::HealthState;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!("gateway_requests_total", "Requests that reached a terminal phase");
    describe_histogram!("gateway_request_duration_seconds", "End-to-end request latency in seconds");
    describe_gauge!("gateway_upstream_health", "Upstream health: 0=healthy, 1=unhealthy, 2=draining");
    describe_gauge!("gateway_admission_queue_depth", "Requests waiting for admission");
    describe_gauge!("gateway_in_flight", "Admitted requests currently in flight");
    describe_counter!("gateway_pool_leases_total", "Connection pool lease events");
    describe_counter!("gateway_config_reloads_total", "Configuration reload attempts");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a request that reached `Completed` or `Aborted`.
pub fn record_request(method: &str, status: u16, reason: &'static str, started: Instant) {
    let method = method.to_string();
    counter!(
        "gateway_requests_total",
        "method" => method.clone(),
        "status" => status.to_string(),
        "reason" => reason
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "method" => method)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_upstream_health(upstream: &str, state: HealthState) {
    gauge!("gateway_upstream_health", "upstream" => upstream.to_string()).set(state as u8 as f64);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("gateway_admission_queue_depth").set(depth as f64);
}

pub fn record_in_flight(in_flight: usize) {
    gauge!("gateway_in_flight").set(in_flight as f64);
}

pub fn record_lease(upstream: &str, outcome: &'static str) {
    counter!(
        "gateway_pool_leases_total",
        "upstream" => upstream.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_config_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("gateway_config_reloads_total", "result" => result).increment(1);
}
