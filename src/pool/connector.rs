//! HTTP transport connections to upstreams.
//!
//! Each connection is a hyper client connection whose driver runs on its own
//! task. Dropping an [`UpstreamConnection`] aborts that task, closing the
//! socket even if a response was only partially read.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;

use crate::config::UpstreamProtocol;
use crate::error::GatewayError;
use crate::load_balancer::upstream::Upstream;
use crate::pool::{Connector, PooledConnection};

enum Sender {
    Http1(http1::SendRequest<Body>),
    Http2(http2::SendRequest<Body>),
}

/// A live client connection to one upstream.
pub struct UpstreamConnection {
    sender: Sender,
    driver: AbortHandle,
}

impl UpstreamConnection {
    pub fn protocol(&self) -> UpstreamProtocol {
        match self.sender {
            Sender::Http1(_) => UpstreamProtocol::Http1,
            Sender::Http2(_) => UpstreamProtocol::Http2,
        }
    }

    /// Send one request and wait for the response head.
    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, hyper::Error> {
        match &mut self.sender {
            Sender::Http1(sender) => {
                sender.ready().await?;
                sender.send_request(request).await
            }
            Sender::Http2(sender) => {
                sender.ready().await?;
                sender.send_request(request).await
            }
        }
    }
}

impl PooledConnection for UpstreamConnection {
    fn is_open(&self) -> bool {
        match &self.sender {
            Sender::Http1(sender) => !sender.is_closed(),
            Sender::Http2(sender) => !sender.is_closed(),
        }
    }
}

impl Drop for UpstreamConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Dials TCP and performs the HTTP handshake for the upstream's protocol.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    connect_timeout: Duration,
}

impl UpstreamConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for UpstreamConnector {
    type Connection = UpstreamConnection;

    async fn connect(&self, upstream: &Upstream) -> Result<UpstreamConnection, GatewayError> {
        let failed = |reason: String| GatewayError::UpstreamConnectFailed {
            upstream: upstream.id.clone(),
            reason,
        };

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(upstream.addr))
            .await
            .map_err(|_| failed(format!("connect timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| failed(e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(upstream = %upstream.id, error = %e, "Failed to set TCP_NODELAY");
        }
        let io = TokioIo::new(stream);
        let upstream_id = upstream.id.clone();

        match upstream.protocol {
            UpstreamProtocol::Http1 => {
                let (sender, conn) = http1::handshake::<_, Body>(io)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(upstream = %upstream_id, error = %e, "Upstream connection closed with error");
                    }
                });
                Ok(UpstreamConnection {
                    sender: Sender::Http1(sender),
                    driver: driver.abort_handle(),
                })
            }
            UpstreamProtocol::Http2 => {
                let (sender, conn) = http2::handshake::<_, _, Body>(TokioExecutor::new(), io)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(upstream = %upstream_id, error = %e, "Upstream connection closed with error");
                    }
                });
                Ok(UpstreamConnection {
                    sender: Sender::Http2(sender),
                    driver: driver.abort_handle(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_connect_failure() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = UpstreamConnector::new(Duration::from_millis(500));
        let err = connector
            .connect(&Upstream::new("gone", addr))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::UpstreamConnectFailed { ref upstream, .. } if upstream == "gone"));
    }

    #[tokio::test]
    async fn http1_connection_round_trip() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
                .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let connector = UpstreamConnector::new(Duration::from_millis(500));
        let mut conn = connector.connect(&Upstream::new("a", addr)).await.unwrap();
        assert_eq!(conn.protocol(), UpstreamProtocol::Http1);

        let request = Request::builder()
            .uri("/ping")
            .header("host", addr.to_string())
            .body(Body::empty())
            .unwrap();
        let response = conn.send(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 204);
        assert!(conn.is_open());
    }
}
