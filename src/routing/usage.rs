//! Strategies driven by each job's own dispatch history.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{no_candidates, RouteStrategyHandler};
use crate::error::Result;
use crate::models::{RouteStrategy, TriggerEnvelope};

/// Picks the address this job has been sent to least often
#[derive(Debug, Default)]
pub struct LeastFrequentlyUsedRoute {
    counts: DashMap<i64, HashMap<String, u64>>,
}

impl LeastFrequentlyUsedRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed dispatch history, e.g. when restoring counters after a restart
    pub fn record(&self, job_id: i64, address: &str, dispatches: u64) {
        *self
            .counts
            .entry(job_id)
            .or_default()
            .entry(address.to_string())
            .or_insert(0) += dispatches;
    }

    pub fn history(&self, job_id: i64) -> HashMap<String, u64> {
        self.counts
            .get(&job_id)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RouteStrategyHandler for LeastFrequentlyUsedRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::LeastFrequentlyUsed
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        // Ties go to the earliest address in the group's order
        let Some(mut chosen) = addresses.first() else {
            return Err(no_candidates(envelope));
        };
        let mut counts = self.counts.entry(envelope.job_id).or_default();
        counts.retain(|address, _| addresses.contains(address));

        let mut fewest = u64::MAX;
        for address in addresses {
            let count = counts.get(address).copied().unwrap_or(0);
            if count < fewest {
                fewest = count;
                chosen = address;
            }
        }

        *counts.entry(chosen.clone()).or_insert(0) += 1;
        Ok(chosen.clone())
    }
}

/// Picks the address this job has gone longest without using
#[derive(Debug, Default)]
pub struct LeastRecentlyUsedRoute {
    last_used: DashMap<i64, HashMap<String, u64>>,
    clock: AtomicU64,
}

impl LeastRecentlyUsedRoute {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteStrategyHandler for LeastRecentlyUsedRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::LeastRecentlyUsed
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        let mut last_used = self.last_used.entry(envelope.job_id).or_default();
        last_used.retain(|address, _| addresses.contains(address));

        // Never-used addresses read as tick 0 and win in list order
        let chosen = addresses
            .iter()
            .min_by_key(|address| last_used.get(*address).copied().unwrap_or(0))
            .cloned()
            .ok_or_else(|| no_candidates(envelope))?;

        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        last_used.insert(chosen.clone(), tick);
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::test_support::{addresses, envelope};

    #[tokio::test]
    async fn test_lfu_prefers_least_dispatched_address() {
        let route = LeastFrequentlyUsedRoute::new();
        route.record(1, "a1", 3);
        route.record(1, "a2", 1);

        let picked = route.route(&envelope(1), &addresses(&["a1", "a2"])).await.unwrap();
        assert_eq!(picked, "a2");
        assert_eq!(route.history(1).get("a2"), Some(&2));
    }

    #[tokio::test]
    async fn test_lfu_forgets_addresses_that_left_the_group() {
        let route = LeastFrequentlyUsedRoute::new();
        route.record(1, "gone", 10);
        route.route(&envelope(1), &addresses(&["a1"])).await.unwrap();
        assert!(!route.history(1).contains_key("gone"));
    }

    #[tokio::test]
    async fn test_lfu_spreads_evenly() {
        let route = LeastFrequentlyUsedRoute::new();
        let candidates = addresses(&["a1", "a2", "a3"]);
        for _ in 0..9 {
            route.route(&envelope(4), &candidates).await.unwrap();
        }
        let history = route.history(4);
        assert!(history.values().all(|count| *count == 3));
    }

    #[tokio::test]
    async fn test_lru_cycles_through_unused_addresses_first() {
        let route = LeastRecentlyUsedRoute::new();
        let candidates = addresses(&["a1", "a2", "a3"]);

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(route.route(&envelope(1), &candidates).await.unwrap());
        }
        assert_eq!(picks, vec!["a1", "a2", "a3", "a1"]);
    }

    #[tokio::test]
    async fn test_usage_strategies_reject_empty_list() {
        let lfu = LeastFrequentlyUsedRoute::new();
        lfu.record(1, "a1", 2);
        assert!(matches!(
            lfu.route(&envelope(1), &[]).await,
            Err(crate::error::SchedulerError::NoAvailableExecutor(_))
        ));
        assert_eq!(lfu.history(1).get("a1"), Some(&2));

        assert!(matches!(
            LeastRecentlyUsedRoute::new().route(&envelope(1), &[]).await,
            Err(crate::error::SchedulerError::NoAvailableExecutor(_))
        ));
    }
}
