//! Streaming upstream responses back to the client.
//!
//! # Responsibilities
//! - Hold the connection lease until the response body has been fully read
//! - Release the lease healthy at end of stream, discard it on error
//! - Finish the request context with the right terminal phase
//!
//! # Design Decisions
//! - The lease, admission permit and upstream slot live inside the body, so
//!   concurrency limits cover the whole response, not just its head
//! - An upstream error mid-body is surfaced as a stream error, which makes
//!   hyper drop the client connection instead of sending a truncated success
//! - A body dropped before the end closes the upstream connection and records
//!   `client_disconnected`
//! - The request deadline keeps running while the body streams; a body still
//!   open [`CANCEL_GRACE`] past it is cut with `deadline_exceeded`

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use futures_util::Stream;
use tokio::time::{self, Sleep};

use crate::admission::AdmissionPermit;
use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::load_balancer::upstream::InFlightPermit;
use crate::pool::{Connector, Lease};

/// How long a response may keep streaming after the request deadline.
pub const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Resources a streaming response keeps alive until it finishes.
pub struct StreamGuards<C: Connector> {
    pub lease: Lease<C>,
    pub admission: AdmissionPermit,
    pub upstream_slot: InFlightPermit,
}

/// Response body stream that owns its lease and request context.
pub struct LeasedBody<S, C: Connector> {
    inner: S,
    guards: Option<StreamGuards<C>>,
    ctx: RequestContext,
    cutoff: Pin<Box<Sleep>>,
}

impl<S, C: Connector> LeasedBody<S, C> {
    pub fn new(inner: S, guards: StreamGuards<C>, ctx: RequestContext) -> Self {
        let cutoff = Box::pin(time::sleep_until(ctx.deadline + CANCEL_GRACE));
        Self {
            inner,
            guards: Some(guards),
            ctx,
            cutoff,
        }
    }

    fn finish(&mut self, healthy: bool) {
        if let Some(guards) = self.guards.take() {
            guards.lease.release(healthy);
        }
    }
}

impl<S, E, C> Stream for LeasedBody<S, C>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
    C: Connector,
{
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.guards.is_none() {
            return Poll::Ready(None);
        }
        if this.cutoff.as_mut().poll(cx).is_ready() {
            let err = GatewayError::DeadlineExceeded {
                stage: "streaming response",
            };
            tracing::warn!(
                request_id = %this.ctx.request_id,
                upstream = this.ctx.upstream.as_deref().unwrap_or_default(),
                "Response still streaming past the request deadline, closing"
            );
            this.finish(false);
            this.ctx.abort(&err);
            return Poll::Ready(Some(Err(err)));
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                this.finish(true);
                this.ctx.complete();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                let err = GatewayError::UpstreamProtocolError {
                    upstream: this.ctx.upstream.clone().unwrap_or_default(),
                    reason: format!("response body failed: {e}"),
                };
                this.finish(false);
                this.ctx.abort(&err);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S, C: Connector> Unpin for LeasedBody<S, C> where S: Unpin {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdmissionConfig, OverflowPolicy};
    use crate::admission::AdmissionController;
    use crate::http::request::Phase;
    use crate::load_balancer::upstream::Upstream;
    use crate::pool::testing::FakeConnector;
    use crate::pool::{PoolManager, PoolSettings};
    use axum::http::Method;
    use futures_util::{stream, StreamExt};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Fixture {
        upstream: Arc<Upstream>,
        pools: PoolManager<FakeConnector>,
        admission: AdmissionController,
    }

    fn fixture() -> Fixture {
        Fixture {
            upstream: Arc::new(Upstream::new("a", "127.0.0.1:9000".parse().unwrap())),
            pools: PoolManager::new(FakeConnector::default(), PoolSettings::default()),
            admission: AdmissionController::new(&AdmissionConfig {
                max_in_flight: 4,
                queue_capacity: 0,
                overflow: OverflowPolicy::Reject,
            }),
        }
    }

    async fn guards(f: &Fixture) -> StreamGuards<FakeConnector> {
        let deadline = Instant::now() + Duration::from_secs(1);
        StreamGuards {
            lease: f.pools.acquire(&f.upstream, deadline).await.unwrap(),
            admission: f.admission.admit(deadline).await.unwrap(),
            upstream_slot: f.admission.admit_upstream(&f.upstream).unwrap(),
        }
    }

    fn streaming_ctx() -> RequestContext {
        let mut ctx = RequestContext::new(
            "req",
            Method::GET,
            "/",
            "127.0.0.1:1".parse().unwrap(),
            Instant::now() + Duration::from_secs(5),
        );
        for phase in [
            Phase::Matched,
            Phase::Admitted,
            Phase::UpstreamSelected,
            Phase::ConnectionAcquired,
            Phase::Forwarding,
            Phase::ResponseStreaming,
        ] {
            ctx.advance(phase).unwrap();
        }
        ctx
    }

    #[tokio::test]
    async fn end_of_stream_returns_lease() {
        let f = fixture();
        let source = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"hello"))]);
        let mut body = LeasedBody::new(source, guards(&f).await, streaming_ctx());

        assert_eq!(f.upstream.active_connections(), 1);
        assert_eq!(f.admission.in_flight(), 1);
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert!(body.next().await.is_none());

        assert_eq!(f.upstream.active_connections(), 0);
        assert_eq!(f.upstream.in_flight(), 0);
        assert_eq!(f.admission.in_flight(), 0);
        assert_eq!(f.pools.stats("a").unwrap().idle, 1);
        assert_eq!(body.ctx.phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn stream_error_discards_connection() {
        let f = fixture();
        let source = stream::iter(vec![Err::<Bytes, _>("reset".to_string())]);
        let mut body = LeasedBody::new(source, guards(&f).await, streaming_ctx());

        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.is_none());
        assert_eq!(f.upstream.active_connections(), 0);
        assert_eq!(f.pools.stats("a").unwrap().idle, 0);
        assert_eq!(body.ctx.phase(), Phase::Aborted("upstream_protocol_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_is_cut_after_the_deadline() {
        let f = fixture();
        let source = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"head"))])
            .chain(stream::pending());
        let ctx = streaming_ctx();
        let cutoff = ctx.deadline + CANCEL_GRACE;
        let mut body = LeasedBody::new(source, guards(&f).await, ctx);

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"head"));
        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(err, GatewayError::DeadlineExceeded { stage: "streaming response" });
        assert!(Instant::now() >= cutoff);
        assert!(body.next().await.is_none());

        assert_eq!(f.upstream.active_connections(), 0);
        assert_eq!(f.upstream.in_flight(), 0);
        assert_eq!(f.admission.in_flight(), 0);
        assert_eq!(f.pools.stats("a").unwrap().idle, 0);
        assert_eq!(body.ctx.phase(), Phase::Aborted("deadline_exceeded"));
    }

    #[tokio::test]
    async fn early_drop_releases_everything() {
        let f = fixture();
        let source = stream::pending::<Result<Bytes, String>>();
        let body = LeasedBody::new(source, guards(&f).await, streaming_ctx());
        drop(body);

        assert_eq!(f.upstream.active_connections(), 0);
        assert_eq!(f.admission.in_flight(), 0);
        assert_eq!(f.pools.stats("a").unwrap().idle, 0);
    }
}
