//! Dominant resource fairness over heartbeat load snapshots.
//!
//! Each candidate's share of every resource is taken relative to the largest
//! value among the candidates; its score is the largest of those shares. The
//! lowest score wins. Capacity limits never need to be configured.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{no_candidates, RouteStrategyHandler};
use crate::error::Result;
use crate::models::{LoadSnapshot, RegistryKind, RouteStrategy, TriggerEnvelope};
use crate::registry::RegistryStore;

#[derive(Debug)]
pub struct LoadBalancedRoute {
    store: Arc<dyn RegistryStore>,
    dead_timeout: Duration,
}

/// Largest observed value per resource, each clamped to at least 1
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClusterMax {
    cpu: f64,
    memory: f64,
    tasks: f64,
}

impl ClusterMax {
    fn of<'a>(loads: impl Iterator<Item = &'a LoadSnapshot>) -> Self {
        let mut max = Self {
            cpu: 1.0,
            memory: 1.0,
            tasks: 1.0,
        };
        for load in loads {
            max.cpu = max.cpu.max(load.cpu_usage);
            max.memory = max.memory.max(load.memory_usage);
            max.tasks = max.tasks.max(load.running_tasks as f64);
        }
        max
    }
}

/// Dominant share scaled to 0-100, lower is less loaded
fn load_score(load: &LoadSnapshot, max: ClusterMax) -> f64 {
    let cpu_share = load.cpu_usage / max.cpu;
    let memory_share = load.memory_usage / max.memory;
    let task_share = load.running_tasks as f64 / max.tasks;
    cpu_share.max(memory_share).max(task_share) * 100.0
}

impl LoadBalancedRoute {
    pub fn new(store: Arc<dyn RegistryStore>, dead_timeout: Duration) -> Self {
        Self {
            store,
            dead_timeout,
        }
    }

    /// Latest load per candidate address, limited to the group's app when known
    async fn known_loads(
        &self,
        app_name: Option<&str>,
        addresses: &[String],
    ) -> Result<HashMap<String, LoadSnapshot>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.dead_timeout).unwrap_or(chrono::Duration::zero());
        let loads = self
            .store
            .list_alive_since(RegistryKind::Executor, cutoff)
            .await?
            .into_iter()
            .filter(|entry| app_name.map_or(true, |app| entry.key == app))
            .filter(|entry| addresses.contains(&entry.value))
            .filter_map(|entry| entry.load.map(|load| (entry.value, load)))
            .collect();
        Ok(loads)
    }
}

#[async_trait]
impl RouteStrategyHandler for LoadBalancedRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::LoadBalanced
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        let Some(first) = addresses.first() else {
            return Err(no_candidates(envelope));
        };
        let loads = match self
            .known_loads(envelope.app_name.as_deref(), addresses)
            .await
        {
            Ok(loads) => loads,
            Err(e) => {
                warn!(job_id = envelope.job_id, error = %e, "Load lookup failed, using first address");
                return Ok(first.clone());
            }
        };
        if loads.is_empty() {
            return Ok(first.clone());
        }

        let max = ClusterMax::of(loads.values());
        let mut best: Option<(&String, f64)> = None;
        for address in addresses {
            let Some(load) = loads.get(address) else {
                continue;
            };
            let score = load_score(load, max);
            if best.map(|(_, lowest)| score < lowest).unwrap_or(true) {
                best = Some((address, score));
            }
        }

        let Some((address, score)) = best else {
            return Ok(first.clone());
        };
        debug!(job_id = envelope.job_id, address = %address, score, "Least loaded executor");
        Ok(address.clone())
    }
}
