//! Weighted random load balancing strategy.

use std::sync::{Arc, Mutex};

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

/// Picks upstreams with probability proportional to their weight.
///
/// The generator is seeded, so two selectors with the same seed make the
/// same picks over the same snapshots. Weight 0 is never picked.
#[derive(Debug)]
pub struct WeightedRandom {
    rng: Mutex<fastrand::Rng>,
}

impl WeightedRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }
}

impl LoadBalancer for WeightedRandom {
    fn select(&self, candidates: &[Arc<Upstream>]) -> Option<Arc<Upstream>> {
        let total: u64 = candidates.iter().map(|u| u64::from(u.weight)).sum();
        if total == 0 {
            return None;
        }

        let mut point = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.u64(0..total)
        };
        for upstream in candidates {
            let weight = u64::from(upstream.weight);
            if point < weight {
                return Some(upstream.clone());
            }
            point -= weight;
        }
        None
    }
}
