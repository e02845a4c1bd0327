//! Upstream registry.
//!
//! # Responsibilities
//! - Own the live set of upstreams
//! - Publish copy-on-write snapshots for lock-free reads on the request path
//! - Apply operator health changes and configuration reloads
//!
//! # Design Decisions
//! - Readers load an `Arc<Vec<_>>` snapshot and never see a half-applied write
//! - Writers are serialized by a mutex and publish a fresh vector each time
//! - Removing an upstream only drops it from the snapshot; leases still hold
//!   their `Arc<Upstream>` until released

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::health::state::HealthState;
use crate::load_balancer::upstream::Upstream;

pub type Snapshot = Arc<Vec<Arc<Upstream>>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("upstream {0:?} is already registered")]
    Duplicate(String),

    #[error("unknown upstream {0:?}")]
    Unknown(String),

    #[error("upstream {0:?} is {1}, not draining")]
    NotDraining(String, HealthState),
}

/// What a reload changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub replaced: Vec<String>,
}

/// Shared, snapshot-isolated set of upstreams.
#[derive(Debug)]
pub struct UpstreamRegistry {
    snapshot: ArcSwap<Vec<Arc<Upstream>>>,
    writer: Mutex<()>,
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// Build a registry from configuration, skipping unparsable entries.
    pub fn from_config(configs: &[UpstreamConfig]) -> Self {
        let registry = Self::new();
        registry.reconcile(configs);
        registry
    }

    /// Add an upstream. Ids are unique.
    pub fn register(&self, upstream: Upstream) -> Result<Arc<Upstream>, RegistryError> {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.load_full();
        if current.iter().any(|u| u.id == upstream.id) {
            return Err(RegistryError::Duplicate(upstream.id));
        }

        let upstream = Arc::new(upstream);
        let mut next = current.as_ref().clone();
        next.push(upstream.clone());
        self.snapshot.store(Arc::new(next));

        tracing::info!(upstream = %upstream.id, addr = %upstream.addr, group = %upstream.group, "Upstream registered");
        Ok(upstream)
    }

    /// Remove an upstream from future selections.
    pub fn deregister(&self, id: &str) -> Result<Arc<Upstream>, RegistryError> {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.load_full();
        let removed = current
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;

        let next: Vec<_> = current.iter().filter(|u| u.id != id).cloned().collect();
        self.snapshot.store(Arc::new(next));

        tracing::info!(
            upstream = %id,
            active_connections = removed.active_connections(),
            "Upstream deregistered"
        );
        Ok(removed)
    }

    /// Current snapshot of every registered upstream, in registration order.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.load_full()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Upstream>> {
        self.snapshot.load().iter().find(|u| u.id == id).cloned()
    }

    /// Healthy upstreams across all groups, in registration order.
    pub fn list_healthy(&self) -> Vec<Arc<Upstream>> {
        self.snapshot
            .load()
            .iter()
            .filter(|u| u.is_selectable())
            .cloned()
            .collect()
    }

    /// Healthy upstreams of one group, in registration order.
    pub fn list_healthy_in(&self, group: &str) -> Vec<Arc<Upstream>> {
        self.snapshot
            .load()
            .iter()
            .filter(|u| u.group == group && u.is_selectable())
            .cloned()
            .collect()
    }

    /// Set an upstream's health. Returns the previous state.
    pub fn mark_health(&self, id: &str, state: HealthState) -> Result<HealthState, RegistryError> {
        let upstream = self.get(id).ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
        let previous = upstream.set_health(state);
        if previous != state {
            tracing::info!(upstream = %id, from = %previous, to = %state, "Upstream health changed");
        }
        Ok(previous)
    }

    /// Move a draining upstream back to healthy. Returns the previous state.
    pub fn undrain(&self, id: &str) -> Result<HealthState, RegistryError> {
        let upstream = self.get(id).ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
        let change = upstream
            .undrain()
            .map_err(|current| RegistryError::NotDraining(id.to_string(), current))?;
        tracing::info!(upstream = %id, from = %change.from, to = %change.to, "Upstream health changed");
        Ok(change.from)
    }

    /// Make the registry match a reloaded upstream list.
    ///
    /// Unchanged upstreams keep their identity, health and counters. Changed
    /// ones are replaced by a fresh healthy instance, except that a drained
    /// upstream stays drained.
    pub fn reconcile(&self, configs: &[UpstreamConfig]) -> ReconcileSummary {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.load_full();
        let mut summary = ReconcileSummary::default();
        let mut next = Vec::with_capacity(configs.len());

        for config in configs {
            let existing = current.iter().find(|u| u.id == config.id);
            match existing {
                Some(u) if u.matches_config(config) => next.push(u.clone()),
                _ => match Upstream::from_config(config) {
                    Ok(upstream) => {
                        if let Some(previous) = existing {
                            if previous.health() == HealthState::Draining {
                                upstream.set_health(HealthState::Draining);
                            }
                            summary.replaced.push(config.id.clone());
                        } else {
                            summary.added.push(config.id.clone());
                        }
                        next.push(Arc::new(upstream));
                    }
                    Err(e) => {
                        tracing::warn!(upstream = %config.id, address = %config.address, error = %e, "Invalid upstream address");
                    }
                },
            }
        }

        for u in current.iter() {
            if !configs.iter().any(|c| c.id == u.id) {
                summary.removed.push(u.id.clone());
            }
        }

        self.snapshot.store(Arc::new(next));
        if summary != ReconcileSummary::default() {
            tracing::info!(
                added = ?summary.added,
                removed = ?summary.removed,
                replaced = ?summary.replaced,
                "Upstream registry reconciled"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(id: &str, port: u16) -> Upstream {
        Upstream::new(id, format!("127.0.0.1:{port}").parse().unwrap())
    }

    fn config(id: &str, port: u16) -> UpstreamConfig {
        UpstreamConfig {
            id: id.into(),
            group: "default".into(),
            address: format!("127.0.0.1:{port}"),
            weight: 1,
            protocol: Default::default(),
            max_in_flight: 100,
        }
    }

    #[test]
    fn register_and_deregister() {
        let registry = UpstreamRegistry::new();
        registry.register(upstream("a", 1)).unwrap();
        registry.register(upstream("b", 2)).unwrap();
        assert_eq!(
            registry.register(upstream("a", 3)).unwrap_err(),
            RegistryError::Duplicate("a".into())
        );

        registry.deregister("a").unwrap();
        let ids: Vec<_> = registry.snapshot().iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(registry.deregister("a").unwrap_err(), RegistryError::Unknown("a".into()));
    }

    #[test]
    fn list_healthy_keeps_order_and_filters() {
        let registry = UpstreamRegistry::new();
        registry.register(upstream("a", 1)).unwrap();
        registry.register(upstream("b", 2)).unwrap();
        registry.register(upstream("c", 3).with_group("other")).unwrap();
        registry.mark_health("a", HealthState::Unhealthy).unwrap();

        let healthy: Vec<_> = registry.list_healthy().iter().map(|u| u.id.clone()).collect();
        assert_eq!(healthy, vec!["b", "c"]);

        let in_default: Vec<_> = registry.list_healthy_in("default").iter().map(|u| u.id.clone()).collect();
        assert_eq!(in_default, vec!["b"]);
    }

    #[test]
    fn draining_is_excluded() {
        let registry = UpstreamRegistry::new();
        registry.register(upstream("a", 1)).unwrap();
        assert_eq!(registry.mark_health("a", HealthState::Draining).unwrap(), HealthState::Healthy);
        assert!(registry.list_healthy().is_empty());
    }

    #[test]
    fn old_snapshots_are_unaffected_by_writes() {
        let registry = UpstreamRegistry::new();
        registry.register(upstream("a", 1)).unwrap();
        let before = registry.snapshot();
        registry.register(upstream("b", 2)).unwrap();
        registry.deregister("a").unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id, "a");
        assert_eq!(registry.snapshot()[0].id, "b");
    }

    #[test]
    fn reconcile_keeps_unchanged_identity() {
        let registry = UpstreamRegistry::from_config(&[config("a", 1), config("b", 2)]);
        let a_before = registry.get("a").unwrap();
        let _lease = a_before.track_lease();
        let b_before = registry.get("b").unwrap();

        let summary = registry.reconcile(&[config("a", 1), config("b", 9), config("c", 3)]);
        assert_eq!(summary.added, vec!["c"]);
        assert_eq!(summary.replaced, vec!["b"]);
        assert!(summary.removed.is_empty());

        assert!(Arc::ptr_eq(&a_before, &registry.get("a").unwrap()));
        assert_eq!(registry.get("a").unwrap().active_connections(), 1);
        assert!(!Arc::ptr_eq(&b_before, &registry.get("b").unwrap()));

        let summary = registry.reconcile(&[config("c", 3)]);
        assert_eq!(summary.removed, vec!["a", "b"]);
        // a deregistered upstream still tracks the lease held against it
        assert_eq!(a_before.active_connections(), 1);
    }

    #[test]
    fn reconcile_keeps_a_drained_upstream_drained() {
        let registry = UpstreamRegistry::from_config(&[config("a", 1), config("b", 2)]);
        registry.mark_health("a", HealthState::Draining).unwrap();
        registry.mark_health("b", HealthState::Unhealthy).unwrap();

        let summary = registry.reconcile(&[config("a", 7), config("b", 8)]);
        assert_eq!(summary.replaced, vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().health(), HealthState::Draining);
        assert_eq!(registry.get("b").unwrap().health(), HealthState::Healthy);
        let healthy: Vec<_> = registry.list_healthy().iter().map(|u| u.id.clone()).collect();
        assert_eq!(healthy, vec!["b"]);

        assert_eq!(registry.undrain("a").unwrap(), HealthState::Draining);
        assert_eq!(
            registry.undrain("a").unwrap_err(),
            RegistryError::NotDraining("a".into(), HealthState::Healthy)
        );
    }
}
