//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router and wire up middleware (request ID, tracing, limits)
//! - Serve through the connection-bounded listener
//! - Spawn background tasks: health checker, pool reaper, reload loop, admin
//! - Drain on shutdown, then force-close after the grace period

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{ConfigError, GatewayConfig};
use crate::health::HealthChecker;
use crate::http::proxy::Gateway;
use crate::http::request::{RequestContext, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::net::{BoundedListener, ClientAddr};
use crate::observability::metrics;
use crate::security::limits::header_count_middleware;

/// HTTP server for the gateway.
pub struct HttpServer {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    health: Arc<HealthChecker>,
}

impl HttpServer {
    /// Build the forwarding state from a validated configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let gateway = Arc::new(Gateway::from_config(&config)?);
        let health = Arc::new(HealthChecker::new(
            gateway.registry().clone(),
            config.health_check.clone(),
        ));
        Ok(Self {
            config,
            gateway,
            health,
        })
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(&self) -> Router {
        let security = &self.config.security;
        Router::new()
            .fallback(proxy_handler)
            .with_state(self.gateway.clone())
            .layer(middleware::from_fn_with_state(
                security.max_header_count,
                header_count_middleware,
            ))
            .layer(RequestBodyLimitLayer::new(security.max_body_size))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(&X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until `shutdown` fires.
    ///
    /// The admin endpoint is served on `admin_listener` when one is given.
    /// Configurations arriving on `config_updates` are applied live.
    pub async fn run(
        self,
        listener: TcpListener,
        admin_listener: Option<TcpListener>,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let listener = BoundedListener::from_listener(listener, self.config.listener.max_connections);
        let gauge = listener.gauge();
        tracing::info!(
            address = %addr,
            max_connections = self.config.listener.max_connections,
            "HTTP server starting"
        );

        tokio::spawn(self.health.clone().run(shutdown.subscribe()));

        let reap_interval = Duration::from_secs(self.config.pool.reap_interval_secs.max(1));
        tokio::spawn(
            self.gateway
                .pools()
                .clone()
                .run_reaper(reap_interval, shutdown.subscribe()),
        );

        tokio::spawn(watch_config(
            self.gateway.clone(),
            self.health.clone(),
            config_updates,
            shutdown.subscribe(),
        ));

        if let Some(admin_listener) = admin_listener {
            let state = Arc::new(AdminState {
                gateway: self.gateway.clone(),
                connections: gauge,
                api_key: self.config.admin.api_key.clone(),
            });
            tokio::spawn(serve_admin(admin_listener, state, shutdown.subscribe()));
        }

        let app = self
            .build_router()
            .into_make_service_with_connect_info::<ClientAddr>();

        let mut stop = shutdown.subscribe();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Stopped accepting connections, draining");
            })
            .into_future();

        let grace = self.config.timeouts.shutdown_grace();
        let mut forced = shutdown.subscribe();
        let force_close = async move {
            let _ = forced.recv().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = serve => result?,
            _ = force_close => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Grace period elapsed, closing remaining connections"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Entry point for every proxied request.
async fn proxy_handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(ClientAddr(client_addr)): ConnectInfo<ClientAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let ctx = RequestContext::new(
        request_id,
        request.method().clone(),
        request.uri().path(),
        client_addr,
        Instant::now() + gateway.default_timeout(),
    );
    tracing::debug!(request_id = %ctx.request_id, client = %client_addr, "Proxying request");

    gateway.handle(ctx, request).await
}

/// Apply reloaded configurations until shutdown.
async fn watch_config(
    gateway: Arc<Gateway>,
    health: Arc<HealthChecker>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                match gateway.apply_config(&config) {
                    Ok(()) => {
                        health.update_config(config.health_check.clone());
                        metrics::record_config_reload(true);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected reloaded configuration, keeping the previous one");
                        metrics::record_config_reload(false);
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn serve_admin(listener: TcpListener, state: Arc<AdminState>, mut shutdown: broadcast::Receiver<()>) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(address = %addr, "Admin endpoint starting"),
        Err(e) => tracing::warn!(error = %e, "Admin listener has no local address"),
    }

    let result = axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Admin endpoint failed");
    }
}
