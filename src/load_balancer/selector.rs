//! Per-group upstream selection.
//!
//! # Responsibilities
//! - Keep one balancer (and its policy state) per upstream group
//! - Select an upstream from a healthy snapshot
//! - Skip upstreams already tried by the same request

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{BalancePolicy, GroupConfig};
use crate::error::GatewayError;
use crate::load_balancer::{
    least_conn::LeastConnections, round_robin::RoundRobin, upstream::Upstream,
    weighted_random::WeightedRandom, LoadBalancer,
};

#[derive(Debug, Clone)]
struct GroupBalancer {
    policy: BalancePolicy,
    seed: u64,
    balancer: Arc<dyn LoadBalancer>,
}

impl GroupBalancer {
    fn new(policy: BalancePolicy, seed: u64) -> Self {
        let balancer: Arc<dyn LoadBalancer> = match policy {
            BalancePolicy::RoundRobin => Arc::new(RoundRobin::new()),
            BalancePolicy::WeightedRandom => Arc::new(WeightedRandom::with_seed(seed)),
            BalancePolicy::LeastConnections => Arc::new(LeastConnections::new()),
        };
        Self {
            policy,
            seed,
            balancer,
        }
    }
}

/// Chooses upstreams per group.
#[derive(Debug, Default)]
pub struct Selector {
    groups: DashMap<String, GroupBalancer>,
}

impl Selector {
    pub fn new(groups: &[GroupConfig]) -> Self {
        let selector = Self::default();
        selector.configure(groups);
        selector
    }

    /// Apply group policies. A group whose policy and seed are unchanged keeps
    /// its balancer state (e.g. the round-robin cursor).
    pub fn configure(&self, groups: &[GroupConfig]) {
        let wanted: HashMap<&str, &GroupConfig> =
            groups.iter().map(|g| (g.name.as_str(), g)).collect();

        self.groups.retain(|name, current| match wanted.get(name.as_str()) {
            Some(g) => g.policy == current.policy && g.seed == current.seed,
            // unlisted groups fall back to lazily created round-robin
            None => current.policy == BalancePolicy::RoundRobin,
        });

        for group in groups {
            self.groups
                .entry(group.name.clone())
                .or_insert_with(|| GroupBalancer::new(group.policy, group.seed));
        }
    }

    pub fn policy(&self, group: &str) -> BalancePolicy {
        self.groups
            .get(group)
            .map(|g| g.policy)
            .unwrap_or_default()
    }

    fn balancer(&self, group: &str) -> Arc<dyn LoadBalancer> {
        if let Some(g) = self.groups.get(group) {
            return g.balancer.clone();
        }
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupBalancer::new(BalancePolicy::RoundRobin, 0))
            .balancer
            .clone()
    }

    /// Select one of `candidates` under the group's policy.
    pub fn select(&self, group: &str, candidates: &[Arc<Upstream>]) -> Result<Arc<Upstream>, GatewayError> {
        self.select_excluding(group, candidates, &[])
    }

    /// Like [`Selector::select`], ignoring upstreams whose id is in `exclude`.
    pub fn select_excluding(
        &self,
        group: &str,
        candidates: &[Arc<Upstream>],
        exclude: &[String],
    ) -> Result<Arc<Upstream>, GatewayError> {
        let no_upstream = || GatewayError::NoHealthyUpstream {
            group: group.to_string(),
        };

        let balancer = self.balancer(group);
        if exclude.is_empty() {
            return balancer.select(candidates).ok_or_else(no_upstream);
        }

        let remaining: Vec<_> = candidates
            .iter()
            .filter(|u| !exclude.contains(&u.id))
            .cloned()
            .collect();
        balancer.select(&remaining).ok_or_else(no_upstream)
    }
}
