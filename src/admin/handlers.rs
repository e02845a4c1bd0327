use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::UpstreamProtocol;
use crate::health::state::HealthState;
use crate::load_balancer::RegistryError;
use crate::observability::metrics;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub open_connections: usize,
    pub max_connections: usize,
    pub upstreams: usize,
    pub healthy_upstreams: usize,
}

#[derive(Debug, Serialize)]
pub struct UpstreamStatus {
    pub id: String,
    pub group: String,
    pub address: String,
    pub protocol: UpstreamProtocol,
    pub weight: u32,
    pub health: HealthState,
    pub active_connections: usize,
    pub in_flight: usize,
    pub idle_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthChange {
    pub id: String,
    pub previous: HealthState,
    pub health: HealthState,
}

pub async fn get_status(State(state): State<Arc<AdminState>>) -> Json<SystemStatus> {
    let admission = state.gateway.admission();
    let snapshot = state.gateway.registry().snapshot();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        in_flight: admission.in_flight(),
        max_in_flight: admission.max_in_flight(),
        queue_depth: admission.queue_depth(),
        queue_capacity: admission.queue_capacity(),
        open_connections: state.connections.open_connections(),
        max_connections: state.connections.max_connections(),
        upstreams: snapshot.len(),
        healthy_upstreams: snapshot.iter().filter(|u| u.is_selectable()).count(),
    })
}

pub async fn get_upstreams(State(state): State<Arc<AdminState>>) -> Json<Vec<UpstreamStatus>> {
    let pools = state.gateway.pools();
    let statuses = state
        .gateway
        .registry()
        .snapshot()
        .iter()
        .map(|u| UpstreamStatus {
            id: u.id.clone(),
            group: u.group.clone(),
            address: u.addr.to_string(),
            protocol: u.protocol,
            weight: u.weight,
            health: u.health(),
            active_connections: u.active_connections(),
            in_flight: u.in_flight(),
            idle_connections: pools.stats(&u.id).map(|s| s.idle).unwrap_or(0),
        })
        .collect();
    Json(statuses)
}

pub async fn drain_upstream(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> Response {
    let result = state.gateway.registry().mark_health(&id, HealthState::Draining);
    health_change(id, result, HealthState::Draining)
}

pub async fn undrain_upstream(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> Response {
    let result = state.gateway.registry().undrain(&id);
    health_change(id, result, HealthState::Healthy)
}

fn health_change(id: String, result: Result<HealthState, RegistryError>, health: HealthState) -> Response {
    match result {
        Ok(previous) => {
            tracing::info!(upstream = %id, from = %previous, to = %health, "Upstream health set by operator");
            metrics::record_upstream_health(&id, health);
            Json(HealthChange { id, previous, health }).into_response()
        }
        Err(e) => {
            let (status, code) = match e {
                RegistryError::NotDraining(..) => (StatusCode::CONFLICT, "not_draining"),
                _ => (StatusCode::NOT_FOUND, "unknown_upstream"),
            };
            (
                status,
                Json(serde_json::json!({
                    "error": {
                        "code": code,
                        "message": e.to_string(),
                        "status": status.as_u16(),
                    }
                })),
            )
                .into_response()
        }
    }
}
