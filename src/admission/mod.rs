//! Admission and backpressure control.
//!
//! # Responsibilities
//! - Bound global concurrent in-flight requests
//! - Queue excess requests in a bounded FIFO, or reject them outright
//! - Fail queued requests whose deadline passes before a slot frees
//! - Bound per-upstream concurrency
//!
//! # Design Decisions
//! - The global bound is a tokio semaphore; its waiter list is the FIFO queue
//! - Queue depth is tracked separately so the capacity can be enforced
//!   before a request starts waiting
//! - Per-upstream slots are never queued: a saturated upstream rejects

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Instant};

use crate::config::{AdmissionConfig, OverflowPolicy};
use crate::error::GatewayError;
use crate::load_balancer::upstream::{InFlightPermit, Upstream};
use crate::observability::metrics;

/// Gatekeeper for in-flight work.
#[derive(Debug)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    queue_capacity: usize,
    overflow: OverflowPolicy,
    queued: Arc<AtomicUsize>,
}

/// Proof that a request was admitted. Frees its slot on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    admitted_at: Instant,
}

impl AdmissionPermit {
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

// Holds a queue position; released however the wait ends.
struct QueueSlot {
    queued: Arc<AtomicUsize>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        let depth = self.queued.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::record_queue_depth(depth);
    }
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            max_in_flight: config.max_in_flight,
            queue_capacity: config.queue_capacity,
            overflow: config.overflow,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Admit a request, waiting in the queue until `deadline` if needed.
    pub async fn admit(&self, deadline: Instant) -> Result<AdmissionPermit, GatewayError> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(self.granted(permit));
        }
        if self.overflow == OverflowPolicy::Reject {
            tracing::debug!(in_flight = self.in_flight(), "Rejecting request: no free slot");
            return Err(GatewayError::Overloaded);
        }

        let _slot = self.enqueue()?;
        match time::timeout_at(deadline, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.granted(permit)),
            Ok(Err(_)) => Err(GatewayError::Overloaded),
            Err(_) => Err(GatewayError::DeadlineExceeded {
                stage: "queued for admission",
            }),
        }
    }

    fn enqueue(&self) -> Result<QueueSlot, GatewayError> {
        let mut depth = self.queued.load(Ordering::Acquire);
        loop {
            if depth >= self.queue_capacity {
                tracing::debug!(queue_depth = depth, "Rejecting request: admission queue full");
                return Err(GatewayError::Overloaded);
            }
            match self.queued.compare_exchange_weak(depth, depth + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => depth = actual,
            }
        }
        metrics::record_queue_depth(depth + 1);
        Ok(QueueSlot {
            queued: self.queued.clone(),
        })
    }

    fn granted(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        metrics::record_in_flight(self.in_flight());
        AdmissionPermit {
            _permit: permit,
            admitted_at: Instant::now(),
        }
    }

    /// Reserve a slot on the chosen upstream.
    pub fn admit_upstream(&self, upstream: &Arc<Upstream>) -> Result<InFlightPermit, GatewayError> {
        upstream.try_reserve().ok_or_else(|| {
            tracing::debug!(upstream = %upstream.id, max_in_flight = upstream.max_in_flight, "Upstream saturated");
            GatewayError::Overloaded
        })
    }

    /// Requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Requests waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}
