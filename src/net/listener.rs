//! TCP listener with bounded accept.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Enforce `max_connections` via semaphore before accepting
//! - Keep accepting after transient accept errors
//!
//! # Design Decisions
//! - The permit travels inside the accepted stream, so a connection slot is
//!   freed exactly when hyper drops the socket
//! - Implements `axum::serve::Listener`, so graceful shutdown comes from axum

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Read-only view of a listener's open connection count.
#[derive(Debug, Clone)]
pub struct ConnectionGauge {
    limit: Arc<Semaphore>,
    max: usize,
}

impl ConnectionGauge {
    pub fn open_connections(&self) -> usize {
        self.max - self.limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max
    }
}

/// A TCP listener that holds at most `max_connections` sockets open.
#[derive(Debug)]
pub struct BoundedListener {
    inner: TcpListener,
    gauge: ConnectionGauge,
}

impl BoundedListener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        Ok(Self::from_listener(listener, config.max_connections))
    }

    pub fn from_listener(inner: TcpListener, max_connections: usize) -> Self {
        Self {
            inner,
            gauge: ConnectionGauge {
                limit: Arc::new(Semaphore::new(max_connections)),
                max: max_connections,
            },
        }
    }

    pub fn gauge(&self) -> ConnectionGauge {
        self.gauge.clone()
    }
}

impl axum::serve::Listener for BoundedListener {
    type Io = BoundedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            // Backpressure: no accept without a free slot.
            let permit = match self.gauge.limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!("Connection limiter closed; no longer accepting");
                    std::future::pending().await
                }
            };

            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer_addr = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    tracing::trace!(
                        peer_addr = %addr,
                        open = self.gauge.open_connections(),
                        "Connection accepted"
                    );
                    return (
                        BoundedStream {
                            inner: stream,
                            _permit: permit,
                        },
                        addr,
                    );
                }
                Err(e) => {
                    // EMFILE and friends: back off instead of spinning
                    tracing::warn!(error = %e, "Accept failed");
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Peer address of a connection accepted by [`BoundedListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, BoundedListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, BoundedListener>) -> Self {
        ClientAddr(*stream.remote_addr())
    }
}

/// An accepted socket holding its connection slot.
#[derive(Debug)]
pub struct BoundedStream {
    inner: TcpStream,
    _permit: OwnedSemaphorePermit,
}

impl AsyncRead for BoundedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for BoundedStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
