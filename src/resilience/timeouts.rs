//! Deadline enforcement.
//!
//! # Design Decisions
//! - Every request carries one absolute deadline; each stage races it
//! - Timed-out stages map to `DeadlineExceeded` (504), naming the stage

use std::future::Future;

use tokio::time::{self, Instant};

use crate::error::GatewayError;

/// Run `fut` until `deadline`; if the deadline wins, fail with the stage name.
pub async fn with_deadline<T, F>(deadline: Instant, stage: &'static str, fut: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::DeadlineExceeded { stage }),
    }
}
