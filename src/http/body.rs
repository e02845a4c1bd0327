//! Bounded body chunking.
//!
//! Bodies are forwarded as they arrive, never buffered whole. A frame larger
//! than `max_chunk_bytes` is split, so no single write carries more than that.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures_util::Stream;

/// Re-slices a byte stream so every item is at most `max` bytes.
pub struct BoundedChunks<S> {
    inner: S,
    max: usize,
    pending: Bytes,
}

impl<S> BoundedChunks<S> {
    pub fn new(inner: S, max: usize) -> Self {
        Self {
            inner,
            max: max.max(1),
            pending: Bytes::new(),
        }
    }
}

impl<S, E> Stream for BoundedChunks<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if !this.pending.is_empty() {
                let take = this.pending.len().min(this.max);
                return Poll::Ready(Some(Ok(this.pending.split_to(take))));
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.pending = chunk,
                other => return other,
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, _) = self.inner.size_hint();
        (lower, None)
    }
}
