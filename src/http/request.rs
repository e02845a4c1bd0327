//! Per-request context and phase tracking.
//!
//! # Phases
//! ```text
//! Received → Matched → Admitted → UpstreamSelected → ConnectionAcquired
//!          → Forwarding → ResponseStreaming → Completed
//!
//! UpstreamSelected → UpstreamSelected   (connect retry)
//! any non-terminal → Aborted(reason)
//! ```
//!
//! # Design Decisions
//! - Every terminal phase is logged with the request id and counted once
//! - A context dropped before reaching a terminal phase means the client
//!   went away; that is recorded as `client_disconnected`
//! - When the response starts streaming, the context moves into the body
//!   via [`RequestContext::hand_off`]

use std::fmt;
use std::net::SocketAddr;

use axum::http::{HeaderName, Method};
use thiserror::Error;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::observability::metrics;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Matched,
    Admitted,
    UpstreamSelected,
    ConnectionAcquired,
    Forwarding,
    ResponseStreaming,
    Completed,
    Aborted(&'static str),
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted(_))
    }

    /// Legal edges of the phase graph.
    pub fn can_transition(self, to: Phase) -> bool {
        use Phase::*;
        match (self, to) {
            (from, Aborted(_)) => !from.is_terminal(),
            (Received, Matched)
            | (Matched, Admitted)
            | (Admitted, UpstreamSelected)
            | (UpstreamSelected, UpstreamSelected)
            | (UpstreamSelected, ConnectionAcquired)
            | (ConnectionAcquired, Forwarding)
            | (Forwarding, ResponseStreaming)
            | (ResponseStreaming, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Aborted(reason) => write!(f, "aborted({reason})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal phase transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub to: Phase,
}

/// State carried by one inbound request.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub client_addr: SocketAddr,
    pub received_at: Instant,
    pub deadline: Instant,
    pub route: Option<String>,
    pub upstream: Option<String>,
    pub attempts: u32,
    phase: Phase,
    history: Vec<Phase>,
    status: Option<u16>,
    handed_off: bool,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, method: Method, path: impl Into<String>, client_addr: SocketAddr, deadline: Instant) -> Self {
        Self {
            request_id: request_id.into(),
            method,
            path: path.into(),
            client_addr,
            received_at: Instant::now(),
            deadline,
            route: None,
            upstream: None,
            attempts: 0,
            phase: Phase::Received,
            history: vec![Phase::Received],
            status: None,
            handed_off: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase entered so far, oldest first.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    /// True if the request ever entered `phase`.
    pub fn reached(&self, phase: Phase) -> bool {
        self.history.contains(&phase)
    }

    /// Move to `to`, rejecting edges outside the phase graph.
    pub fn advance(&mut self, to: Phase) -> Result<(), IllegalTransition> {
        if !self.phase.can_transition(to) {
            return Err(IllegalTransition { from: self.phase, to });
        }
        self.phase = to;
        self.history.push(to);
        Ok(())
    }

    /// Reset the deadline to `timeout` after receipt.
    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.deadline = self.received_at + timeout;
    }

    /// Response status sent to the client, recorded with the terminal phase.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Finish successfully.
    pub fn complete(&mut self) {
        if self.advance(Phase::Completed).is_ok() {
            self.record_terminal("ok");
        }
    }

    /// Finish with `err`. No-op if the request already finished.
    pub fn abort(&mut self, err: &GatewayError) {
        let reason = err.reason_code();
        if self.advance(Phase::Aborted(reason)).is_err() {
            return;
        }
        if self.status.is_none() {
            self.status = Some(err.status_code().as_u16());
        }
        match err {
            GatewayError::NoRouteMatched { .. } | GatewayError::ClientDisconnected => tracing::info!(
                request_id = %self.request_id,
                path = %self.path,
                error = %err,
                "Request aborted"
            ),
            _ => tracing::warn!(
                request_id = %self.request_id,
                path = %self.path,
                upstream = self.upstream.as_deref().unwrap_or("-"),
                attempts = self.attempts,
                error = %err,
                "Request aborted"
            ),
        }
        self.record_terminal(reason);
    }

    /// Move the context out, leaving a husk whose drop records nothing.
    pub fn hand_off(&mut self) -> RequestContext {
        let taken = RequestContext {
            request_id: self.request_id.clone(),
            method: self.method.clone(),
            path: self.path.clone(),
            client_addr: self.client_addr,
            received_at: self.received_at,
            deadline: self.deadline,
            route: self.route.clone(),
            upstream: self.upstream.clone(),
            attempts: self.attempts,
            phase: self.phase,
            history: std::mem::take(&mut self.history),
            status: self.status,
            handed_off: false,
        };
        self.handed_off = true;
        taken
    }

    fn record_terminal(&self, reason: &'static str) {
        let status = self.status.unwrap_or(0);
        tracing::debug!(
            request_id = %self.request_id,
            status,
            reason,
            elapsed_ms = self.received_at.elapsed().as_millis() as u64,
            phases = ?self.history,
            "Request finished"
        );
        metrics::record_request(self.method.as_str(), status, reason, self.received_at);
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.handed_off && !self.phase.is_terminal() {
            self.abort(&GatewayError::ClientDisconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx() -> RequestContext {
        RequestContext::new(
            "req-1",
            Method::GET,
            "/api",
            "127.0.0.1:5000".parse().unwrap(),
            Instant::now() + Duration::from_secs(30),
        )
    }

    #[test]
    fn happy_path_with_retry() {
        let mut ctx = ctx();
        for phase in [
            Phase::Matched,
            Phase::Admitted,
            Phase::UpstreamSelected,
            Phase::UpstreamSelected,
            Phase::ConnectionAcquired,
            Phase::Forwarding,
            Phase::ResponseStreaming,
        ] {
            ctx.advance(phase).unwrap();
        }
        ctx.complete();
        assert_eq!(ctx.phase(), Phase::Completed);
        assert_eq!(ctx.history().len(), 9);
    }

    #[test]
    fn skipping_phases_is_rejected() {
        let mut ctx = ctx();
        assert_eq!(
            ctx.advance(Phase::UpstreamSelected),
            Err(IllegalTransition {
                from: Phase::Received,
                to: Phase::UpstreamSelected
            })
        );
        assert_eq!(ctx.phase(), Phase::Received);
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut ctx = ctx();
        ctx.abort(&GatewayError::Overloaded);
        assert_eq!(ctx.phase(), Phase::Aborted("overloaded"));

        ctx.abort(&GatewayError::ClientDisconnected);
        assert_eq!(ctx.phase(), Phase::Aborted("overloaded"));
        assert!(ctx.advance(Phase::Matched).is_err());
        assert!(!Phase::Completed.can_transition(Phase::Aborted("x")));
    }

    #[test]
    fn hand_off_moves_the_live_context() {
        let mut original = ctx();
        original.advance(Phase::Matched).unwrap();
        let mut moved = original.hand_off();
        drop(original);

        assert_eq!(moved.phase(), Phase::Matched);
        moved.abort(&GatewayError::ClientDisconnected);
        assert_eq!(moved.phase(), Phase::Aborted("client_disconnected"));
    }

    #[test]
    fn route_timeout_resets_deadline() {
        let mut ctx = ctx();
        ctx.set_timeout(Duration::from_millis(10));
        assert_eq!(ctx.deadline, ctx.received_at + Duration::from_millis(10));
    }
}
