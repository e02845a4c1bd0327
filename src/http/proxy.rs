//! The proxy pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext + Request
//!     → Router::match_request           (Matched, or 404)
//!     → AdmissionController::admit      (Admitted, or 503/504)
//!     → Selector over healthy snapshot  (UpstreamSelected, or 503)
//!     → PoolManager::acquire            (ConnectionAcquired; connect retry)
//!     → send head + streamed body       (Forwarding)
//!     → LeasedBody streams the response (ResponseStreaming → Completed)
//! ```
//!
//! # Design Decisions
//! - The router and forwarding settings are swapped atomically on reload;
//!   a request keeps the snapshot it started with
//! - Nothing is buffered: both bodies are streamed in bounded chunks

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderValue, Request, Response, Uri, Version};
use axum::response::IntoResponse;

use crate::admission::AdmissionController;
use crate::config::{ConfigError, GatewayConfig, UpstreamProtocol};
use crate::error::GatewayError;
use crate::http::body::BoundedChunks;
use crate::http::request::{Phase, RequestContext, X_REQUEST_ID};
use crate::http::response::{LeasedBody, StreamGuards};
use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::{Selector, UpstreamRegistry};
use crate::pool::{PoolManager, PoolSettings, UpstreamConnector};
use crate::resilience::{with_deadline, RetryPolicy};
use crate::routing::Router;
use crate::security::headers::{append_forwarded, strip_hop_by_hop};

/// Settings that may change on reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardSettings {
    pub retry: RetryPolicy,
    pub max_chunk_bytes: usize,
    pub default_timeout: Duration,
}

impl From<&GatewayConfig> for ForwardSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retries),
            max_chunk_bytes: config.security.max_chunk_bytes,
            default_timeout: config.timeouts.request(),
        }
    }
}

/// Shared state of the forwarding path.
pub struct Gateway {
    registry: Arc<UpstreamRegistry>,
    selector: Selector,
    pools: Arc<PoolManager<UpstreamConnector>>,
    admission: AdmissionController,
    router: ArcSwap<Router>,
    settings: ArcSwap<ForwardSettings>,
}

impl Gateway {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let router = Router::from_config(&config.routes, config.timeouts.request())
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        let connector = UpstreamConnector::new(Duration::from_millis(config.pool.connect_timeout_ms));

        Ok(Self {
            registry: Arc::new(UpstreamRegistry::from_config(&config.upstreams)),
            selector: Selector::new(&config.groups),
            pools: Arc::new(PoolManager::new(connector, PoolSettings::from(&config.pool))),
            admission: AdmissionController::new(&config.admission),
            router: ArcSwap::from_pointee(router),
            settings: ArcSwap::from_pointee(ForwardSettings::from(config)),
        })
    }

    /// Apply a reloaded configuration. Listener, pool and admission limits
    /// are fixed at startup and ignored here.
    pub fn apply_config(&self, config: &GatewayConfig) -> Result<(), ConfigError> {
        let router = Router::from_config(&config.routes, config.timeouts.request())
            .map_err(|e| ConfigError::Validation(vec![e]))?;

        self.registry.reconcile(&config.upstreams);
        let ids: Vec<String> = config.upstreams.iter().map(|u| u.id.clone()).collect();
        self.pools.retain_upstreams(&ids);
        self.selector.configure(&config.groups);
        self.router.store(Arc::new(router));
        self.settings.store(Arc::new(ForwardSettings::from(config)));

        tracing::info!(
            routes = config.routes.len(),
            upstreams = config.upstreams.len(),
            "Gateway configuration applied"
        );
        Ok(())
    }

    pub fn registry(&self) -> &Arc<UpstreamRegistry> {
        &self.registry
    }

    pub fn pools(&self) -> &Arc<PoolManager<UpstreamConnector>> {
        &self.pools
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Deadline applied before a route is matched.
    pub fn default_timeout(&self) -> Duration {
        self.settings.load().default_timeout
    }

    /// Proxy one request, turning failures into error responses.
    pub async fn handle(&self, mut ctx: RequestContext, request: Request<Body>) -> Response<Body> {
        match self.forward(&mut ctx, request).await {
            Ok(response) => response,
            Err(err) => {
                ctx.abort(&err);
                err.into_response()
            }
        }
    }

    /// Run the pipeline up to the start of the response stream.
    pub async fn forward(&self, ctx: &mut RequestContext, mut request: Request<Body>) -> Result<Response<Body>, GatewayError> {
        let settings = **self.settings.load();
        let router = self.router.load_full();
        fill_host(&mut request);

        let rule = router
            .match_request(request.uri().path(), request.headers())
            .ok_or_else(|| GatewayError::NoRouteMatched {
                path: ctx.path.clone(),
            })?;
        ctx.route = Some(rule.name.clone());
        ctx.set_timeout(rule.timeout);
        enter(ctx, Phase::Matched);

        let admission = self.admission.admit(ctx.deadline).await?;
        enter(ctx, Phase::Admitted);

        let group = rule.upstream_group.as_str();
        let mut tried: Vec<String> = Vec::new();
        let mut first_error: Option<GatewayError> = None;
        let (upstream, mut lease, upstream_slot) = loop {
            let candidates = self.registry.list_healthy_in(group);
            let upstream = match self.selector.select_excluding(group, &candidates, &tried) {
                Ok(upstream) => upstream,
                Err(e) => return Err(first_error.unwrap_or(e)),
            };
            enter(ctx, Phase::UpstreamSelected);
            ctx.attempts += 1;
            ctx.upstream = Some(upstream.id.clone());

            let slot = self.admission.admit_upstream(&upstream)?;
            match self.pools.acquire(&upstream, ctx.deadline).await {
                Ok(lease) => break (upstream, lease, slot),
                Err(err) if settings.retry.allows(&err, ctx.attempts) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        upstream = %upstream.id,
                        error = %err,
                        "Upstream connect failed, retrying on another upstream"
                    );
                    tried.push(upstream.id.clone());
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        };
        enter(ctx, Phase::ConnectionAcquired);

        let (mut parts, body) = request.into_parts();
        let inbound_version = parts.version;
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded(&mut parts.headers, ctx.client_addr.ip(), "http");
        rule.rewrites.apply(&mut parts.headers);
        if let Ok(id) = HeaderValue::from_str(&ctx.request_id) {
            parts.headers.insert(X_REQUEST_ID.clone(), id);
        }
        parts.uri = upstream_uri(&upstream, &parts.uri)?;
        parts.version = match upstream.protocol {
            UpstreamProtocol::Http1 => Version::HTTP_11,
            UpstreamProtocol::Http2 => Version::HTTP_2,
        };
        let body = if body.is_end_stream() {
            Body::empty()
        } else {
            Body::from_stream(BoundedChunks::new(body.into_data_stream(), settings.max_chunk_bytes))
        };

        enter(ctx, Phase::Forwarding);
        tracing::debug!(
            request_id = %ctx.request_id,
            route = %rule.name,
            upstream = %upstream.id,
            reused = lease.is_reused(),
            "Forwarding request"
        );

        let upstream_id = upstream.id.clone();
        let sent = with_deadline(ctx.deadline, "awaiting upstream response", async {
            let conn = lease.connection_mut().ok_or_else(|| GatewayError::UpstreamProtocolError {
                upstream: upstream_id.clone(),
                reason: "lease holds no connection".into(),
            })?;
            conn.send(Request::from_parts(parts, body))
                .await
                .map_err(|e| GatewayError::UpstreamProtocolError {
                    upstream: upstream_id.clone(),
                    reason: e.to_string(),
                })
        })
        .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                lease.release(false);
                return Err(err);
            }
        };

        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        parts.version = inbound_version;
        ctx.set_status(parts.status.as_u16());
        enter(ctx, Phase::ResponseStreaming);

        let data = BoundedChunks::new(Body::new(incoming).into_data_stream(), settings.max_chunk_bytes);
        let guards = StreamGuards {
            lease,
            admission,
            upstream_slot,
        };
        let body = LeasedBody::new(data, guards, ctx.hand_off());
        Ok(Response::from_parts(parts, Body::from_stream(body)))
    }
}

fn enter(ctx: &mut RequestContext, phase: Phase) {
    if let Err(e) = ctx.advance(phase) {
        tracing::error!(request_id = %ctx.request_id, error = %e, "Request phase out of order");
    }
}

// HTTP/2 clients send the host only as the `:authority` of the target.
fn fill_host(request: &mut Request<Body>) {
    if request.headers().contains_key(header::HOST) {
        return;
    }
    let host = request
        .uri()
        .authority()
        .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok());
    if let Some(host) = host {
        request.headers_mut().insert(header::HOST, host);
    }
}

// HTTP/1.1 upstreams take origin-form targets, HTTP/2 needs scheme and authority.
fn upstream_uri(upstream: &Upstream, original: &Uri) -> Result<Uri, GatewayError> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = match upstream.protocol {
        UpstreamProtocol::Http1 => Uri::builder().path_and_query(path_and_query).build(),
        UpstreamProtocol::Http2 => Uri::builder()
            .scheme("http")
            .authority(upstream.addr.to_string())
            .path_and_query(path_and_query)
            .build(),
    };
    uri.map_err(|e| GatewayError::UpstreamProtocolError {
        upstream: upstream.id.clone(),
        reason: format!("invalid upstream uri: {e}"),
    })
}
