//! Active health checking.
//!
//! # Responsibilities
//! - Periodically check every upstream with an HTTP GET
//! - Feed results into each upstream's threshold state machine
//! - Log and export health changes

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, Request};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{HealthCheckConfig, UpstreamProtocol};
use crate::health::state::{HealthState, CheckOutcome, Thresholds};
use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::UpstreamRegistry;
use crate::observability::metrics;

/// Periodic checker for all registered upstreams.
pub struct HealthChecker {
    registry: Arc<UpstreamRegistry>,
    config: ArcSwap<HealthCheckConfig>,
    http1: Client<HttpConnector, Body>,
    http2: Client<HttpConnector, Body>,
}

impl HealthChecker {
    pub fn new(registry: Arc<UpstreamRegistry>, config: HealthCheckConfig) -> Self {
        let http1 = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let http2 = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(HttpConnector::new());

        Self {
            registry,
            config: ArcSwap::from_pointee(config),
            http1,
            http2,
        }
    }

    /// Replace check settings; takes effect from the next round.
    pub fn update_config(&self, config: HealthCheckConfig) {
        self.config.store(Arc::new(config));
    }

    /// Check on a fixed interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        {
            let config = self.config.load();
            tracing::info!(
                interval_secs = config.interval_secs,
                path = %config.path,
                "Health checker starting"
            );
        }

        loop {
            let interval = Duration::from_secs(self.config.load().interval_secs.max(1));
            tokio::select! {
                _ = time::sleep(interval) => {
                    if self.config.load().enabled {
                        self.check_all().await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one check round over every non-draining upstream.
    pub async fn check_all(&self) {
        let loaded = self.config.load_full();
        let config: &HealthCheckConfig = &loaded;
        let thresholds = Thresholds::from(config);
        let snapshot = self.registry.snapshot();

        let checks = snapshot
            .iter()
            .filter(|u| u.health() != HealthState::Draining)
            .map(|upstream| async move {
                let outcome = self.check(upstream, config).await;
                if let Some(change) = upstream.record_check(outcome, thresholds) {
                    match change.to {
                        HealthState::Healthy => tracing::info!(
                            upstream = %upstream.id,
                            from = %change.from,
                            to = %change.to,
                            "Upstream recovered"
                        ),
                        _ => tracing::warn!(
                            upstream = %upstream.id,
                            from = %change.from,
                            to = %change.to,
                            "Upstream marked unhealthy"
                        ),
                    }
                }
                metrics::record_upstream_health(&upstream.id, upstream.health());
            });
        join_all(checks).await;
    }

    async fn check(&self, upstream: &Upstream, config: &HealthCheckConfig) -> CheckOutcome {
        let uri = format!("http://{}{}", upstream.addr, config.path);
        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::USER_AGENT, "api-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(upstream = %upstream.id, error = %e, "Failed to build health check request");
                return CheckOutcome::Failure;
            }
        };

        let client = match upstream.protocol {
            UpstreamProtocol::Http1 => &self.http1,
            UpstreamProtocol::Http2 => &self.http2,
        };
        let timeout = Duration::from_millis(config.timeout_ms);

        match time::timeout(timeout, client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => CheckOutcome::Success,
            Ok(Ok(response)) => {
                tracing::debug!(upstream = %upstream.id, status = %response.status(), "Health check failed: non-success status");
                CheckOutcome::Failure
            }
            Ok(Err(e)) => {
                tracing::debug!(upstream = %upstream.id, error = %e, "Health check failed: connection error");
                CheckOutcome::Failure
            }
            Err(_) => {
                tracing::debug!(upstream = %upstream.id, "Health check failed: timeout");
                CheckOutcome::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn responder(status_line: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    fn config(unhealthy: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            unhealthy_threshold: unhealthy,
            healthy_threshold: 1,
            timeout_ms: 500,
            ..HealthCheckConfig::default()
        }
    }

    #[tokio::test]
    async fn failing_upstream_is_evicted_after_threshold() {
        let failing = responder("500 Internal Server Error").await;
        let registry = Arc::new(UpstreamRegistry::new());
        registry.register(Upstream::new("bad", failing)).unwrap();
        let checker = HealthChecker::new(registry.clone(), config(2));

        checker.check_all().await;
        assert_eq!(registry.get("bad").unwrap().health(), HealthState::Healthy);
        checker.check_all().await;
        assert_eq!(registry.get("bad").unwrap().health(), HealthState::Unhealthy);
        assert!(registry.list_healthy().is_empty());
    }

    #[tokio::test]
    async fn one_success_recovers() {
        let ok = responder("200 OK").await;
        let registry = Arc::new(UpstreamRegistry::new());
        registry.register(Upstream::new("good", ok)).unwrap();
        registry.mark_health("good", HealthState::Unhealthy).unwrap();
        let checker = HealthChecker::new(registry.clone(), config(3));

        checker.check_all().await;
        assert_eq!(registry.get("good").unwrap().health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn draining_is_left_alone() {
        let registry = Arc::new(UpstreamRegistry::new());
        // nothing listens here; checks would fail
        registry.register(Upstream::new("d", "127.0.0.1:1".parse().unwrap())).unwrap();
        registry.mark_health("d", HealthState::Draining).unwrap();
        let checker = HealthChecker::new(registry.clone(), config(1));

        checker.check_all().await;
        assert_eq!(registry.get("d").unwrap().health(), HealthState::Draining);
    }
}
