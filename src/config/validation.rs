//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing upstream groups)
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//! - Detect duplicate identifiers
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid address {address:?} for {owner}")]
    InvalidAddress { owner: String, address: String },

    #[error("duplicate upstream id {0:?}")]
    DuplicateUpstream(String),

    #[error("duplicate route name {0:?}")]
    DuplicateRoute(String),

    #[error("route {route:?} targets unknown upstream group {group:?}")]
    UnknownGroup { route: String, group: String },

    #[error("route {route:?} path prefix {prefix:?} must start with '/'")]
    InvalidPathPrefix { route: String, prefix: String },

    #[error("route {route:?} has invalid header {header:?}")]
    InvalidHeader { route: String, header: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            owner: "listener".into(),
            address: config.listener.bind_address.clone(),
        });
    }

    let mut ids = HashSet::new();
    let mut groups = HashSet::new();
    for upstream in &config.upstreams {
        if !ids.insert(upstream.id.as_str()) {
            errors.push(ValidationError::DuplicateUpstream(upstream.id.clone()));
        }
        if upstream.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                owner: format!("upstream {}", upstream.id),
                address: upstream.address.clone(),
            });
        }
        if upstream.max_in_flight == 0 {
            errors.push(ValidationError::NotPositive { field: "upstreams.max_in_flight" });
        }
        groups.insert(upstream.group.as_str());
    }

    let mut route_names = HashSet::new();
    for route in &config.routes {
        if !route_names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPathPrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        if !groups.contains(route.upstream_group.as_str()) {
            errors.push(ValidationError::UnknownGroup {
                route: route.name.clone(),
                group: route.upstream_group.clone(),
            });
        }

        let names = route
            .headers
            .iter()
            .map(|h| h.name.as_str())
            .chain(route.remove_headers.iter().map(String::as_str))
            .chain(route.set_headers.keys().map(String::as_str));
        for name in names {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidHeader {
                    route: route.name.clone(),
                    header: name.to_string(),
                });
            }
        }
        for value in route.set_headers.values() {
            if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::InvalidHeader {
                    route: route.name.clone(),
                    header: value.clone(),
                });
            }
        }
        if route.timeout_ms == Some(0) {
            errors.push(ValidationError::NotPositive { field: "routes.timeout_ms" });
        }
    }

    let positive = [
        (config.listener.max_connections, "listener.max_connections"),
        (config.admission.max_in_flight, "admission.max_in_flight"),
        (config.pool.max_connections_per_upstream, "pool.max_connections_per_upstream"),
        (config.security.max_chunk_bytes, "security.max_chunk_bytes"),
        (config.security.max_header_count, "security.max_header_count"),
        (config.health_check.interval_secs as usize, "health_check.interval_secs"),
        (config.health_check.timeout_ms as usize, "health_check.timeout_ms"),
        (config.health_check.unhealthy_threshold as usize, "health_check.unhealthy_threshold"),
        (config.health_check.healthy_threshold as usize, "health_check.healthy_threshold"),
        (config.timeouts.request_secs as usize, "timeouts.request_secs"),
        (config.pool.reap_interval_secs as usize, "pool.reap_interval_secs"),
    ];
    for (value, field) in positive {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteConfig, UpstreamConfig};

    fn upstream(id: &str, address: &str) -> UpstreamConfig {
        UpstreamConfig {
            id: id.into(),
            group: "web".into(),
            address: address.into(),
            weight: 1,
            protocol: Default::default(),
            max_in_flight: 10,
        }
    }

    fn route(name: &str, prefix: &str, group: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            host: None,
            headers: Vec::new(),
            upstream_group: group.into(),
            set_headers: Default::default(),
            remove_headers: Vec::new(),
            timeout_ms: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.upstreams.push(upstream("a", "127.0.0.1:3000"));
        config.upstreams.push(upstream("a", "not-an-address"));
        config.routes.push(route("r1", "api", "missing"));
        config.admission.max_in_flight = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateUpstream("a".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidAddress { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidPathPrefix { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownGroup { .. })));
        assert!(errors.contains(&ValidationError::NotPositive { field: "admission.max_in_flight" }));
    }

    #[test]
    fn rejects_bad_header_names() {
        let mut config = GatewayConfig::default();
        config.upstreams.push(upstream("a", "127.0.0.1:3000"));
        let mut r = route("r1", "/", "web");
        r.remove_headers.push("bad header".into());
        config.routes.push(r);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::InvalidHeader { .. }));
    }
}
