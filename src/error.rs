//! Gateway error taxonomy.
//!
//! Every request that does not complete normally ends with exactly one of
//! these errors. Each variant maps to a client-visible status code and a
//! stable reason code used in logs and metrics.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors produced while proxying a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("no route matches path {path}")]
    NoRouteMatched { path: String },

    #[error("no healthy upstream available in group {group}")]
    NoHealthyUpstream { group: String },

    #[error("connection pool for upstream {upstream} exhausted")]
    PoolExhausted { upstream: String },

    #[error("gateway overloaded")]
    Overloaded,

    #[error("deadline exceeded while {stage}")]
    DeadlineExceeded { stage: &'static str },

    #[error("failed to connect to upstream {upstream}: {reason}")]
    UpstreamConnectFailed { upstream: String, reason: String },

    #[error("upstream {upstream} protocol error: {reason}")]
    UpstreamProtocolError { upstream: String, reason: String },

    #[error("client disconnected")]
    ClientDisconnected,
}

impl GatewayError {
    /// Status code returned to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            GatewayError::NoHealthyUpstream { .. }
            | GatewayError::PoolExhausted { .. }
            | GatewayError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamConnectFailed { .. }
            | GatewayError::UpstreamProtocolError { .. } => StatusCode::BAD_GATEWAY,
            // Nobody is listening any more; the code only shows up in access logs.
            GatewayError::ClientDisconnected => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }

    /// Stable reason code recorded for the terminal state of a request.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::NoRouteMatched { .. } => "no_route_matched",
            GatewayError::NoHealthyUpstream { .. } => "no_healthy_upstream",
            GatewayError::PoolExhausted { .. } => "pool_exhausted",
            GatewayError::Overloaded => "overloaded",
            GatewayError::DeadlineExceeded { .. } => "deadline_exceeded",
            GatewayError::UpstreamConnectFailed { .. } => "upstream_connect_failed",
            GatewayError::UpstreamProtocolError { .. } => "upstream_protocol_error",
            GatewayError::ClientDisconnected => "client_disconnected",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.reason_code(),
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_map_to_503() {
        assert_eq!(GatewayError::Overloaded.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::PoolExhausted { upstream: "a".into() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::NoHealthyUpstream { group: "web".into() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn timeouts_and_protocol_errors() {
        assert_eq!(
            GatewayError::DeadlineExceeded { stage: "queued" }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::UpstreamProtocolError { upstream: "a".into(), reason: "eof".into() }
                .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(GatewayError::ClientDisconnected.status_code().as_u16(), 499);
    }

    #[test]
    fn error_response_carries_reason_code() {
        let response = GatewayError::Overloaded.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
