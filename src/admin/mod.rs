//! Control endpoint.
//!
//! Served on its own listener so operator traffic never competes with
//! proxied traffic for admission slots.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::http::proxy::Gateway;
use crate::net::ConnectionGauge;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by the admin handlers.
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub connections: ConnectionGauge,
    pub api_key: Option<String>,
}

pub fn setup_admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/upstreams", get(get_upstreams))
        .route("/admin/upstreams/{id}/drain", post(drain_upstream))
        .route("/admin/upstreams/{id}/undrain", post(undrain_upstream))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
