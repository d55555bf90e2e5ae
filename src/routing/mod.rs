//! # Route Strategy Registry
//!
//! Fixed catalog of address-selection algorithms. Callers pass the strategy
//! identifier stored on the job; per-job state such as cursors and counters
//! lives inside each strategy keyed by job id, so jobs sharing a group route
//! independently.

pub mod basic;
pub mod consistent_hash;
pub mod load_balanced;
pub mod probe;
pub mod usage;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::dispatch::WorkerClient;
use crate::error::{Result, SchedulerError};
use crate::models::{RouteStrategy, TriggerEnvelope};
use crate::registry::RegistryStore;

pub use basic::{FirstRoute, LastRoute, RandomRoute, RoundRobinRoute, ShardingBroadcastRoute};
pub use consistent_hash::ConsistentHashRoute;
pub use load_balanced::LoadBalancedRoute;
pub use probe::{BusyoverRoute, FailoverRoute};
pub use usage::{LeastFrequentlyUsedRoute, LeastRecentlyUsedRoute};

/// One address-selection algorithm.
///
/// `route` fails with `NoAvailableExecutor` when handed an empty address list.
#[async_trait]
pub trait RouteStrategyHandler: Send + Sync + std::fmt::Debug {
    fn strategy(&self) -> RouteStrategy;

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct RouteStrategyRegistry {
    strategies: HashMap<RouteStrategy, Arc<dyn RouteStrategyHandler>>,
}

impl RouteStrategyRegistry {
    /// Registry holding every built-in strategy
    pub fn new(
        worker_client: Arc<dyn WorkerClient>,
        store: Arc<dyn RegistryStore>,
        dead_timeout: std::time::Duration,
    ) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(FirstRoute));
        registry.register(Arc::new(LastRoute));
        registry.register(Arc::new(RoundRobinRoute::new()));
        registry.register(Arc::new(RandomRoute));
        registry.register(Arc::new(ConsistentHashRoute::new()));
        registry.register(Arc::new(LeastFrequentlyUsedRoute::new()));
        registry.register(Arc::new(LeastRecentlyUsedRoute::new()));
        registry.register(Arc::new(FailoverRoute::new(worker_client.clone())));
        registry.register(Arc::new(BusyoverRoute::new(worker_client)));
        registry.register(Arc::new(LoadBalancedRoute::new(store, dead_timeout)));
        registry.register(Arc::new(ShardingBroadcastRoute));
        registry
    }

    /// Add or replace the handler for its strategy
    pub fn register(&mut self, handler: Arc<dyn RouteStrategyHandler>) {
        self.strategies.insert(handler.strategy(), handler);
    }

    pub fn get(&self, strategy: RouteStrategy) -> Option<Arc<dyn RouteStrategyHandler>> {
        self.strategies.get(&strategy).cloned()
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        strategy_id
            .parse::<RouteStrategy>()
            .map(|s| self.strategies.contains_key(&s))
            .unwrap_or(false)
    }

    /// Pick one address for `envelope` using the named strategy
    pub async fn select(
        &self,
        strategy_id: &str,
        envelope: &TriggerEnvelope,
        addresses: &[String],
    ) -> Result<String> {
        let strategy = strategy_id
            .parse::<RouteStrategy>()
            .map_err(SchedulerError::InvalidArgument)?;
        let handler = self.strategies.get(&strategy).ok_or_else(|| {
            SchedulerError::invalid_argument(format!("route strategy {strategy} is not registered"))
        })?;

        if addresses.is_empty() {
            return Err(no_candidates(envelope));
        }

        let address = handler.route(envelope, addresses).await?;
        debug!(
            job_id = envelope.job_id,
            strategy = %strategy,
            address = %address,
            candidates = addresses.len(),
            "Route selected"
        );
        Ok(address)
    }
}

pub(crate) fn no_candidates(envelope: &TriggerEnvelope) -> SchedulerError {
    SchedulerError::NoAvailableExecutor(format!("no live address for job {}", envelope.job_id))
}


#[cfg(test)]
mod tests {
    use super::test_support::{addresses, envelope};
    use super::*;
    use crate::registry::InMemoryRegistryStore;
    use crate::test_helpers::ScriptedWorkerClient;
    use std::time::Duration;

    fn registry() -> RouteStrategyRegistry {
        RouteStrategyRegistry::new(
            Arc::new(ScriptedWorkerClient::new()),
            Arc::new(InMemoryRegistryStore::new()),
            Duration::from_secs(90),
        )
    }

    #[tokio::test]
    async fn test_every_builtin_strategy_is_registered() {
        let registry = registry();
        for strategy in RouteStrategy::ALL {
            assert!(registry.contains(strategy.as_str()), "{strategy} missing");
        }
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_invalid_argument() {
        let result = registry()
            .select("NEAREST", &envelope(1), &addresses(&["a1"]))
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_empty_address_list_is_no_available_executor() {
        let registry = registry();
        for strategy in RouteStrategy::ALL {
            let result = registry.select(strategy.as_str(), &envelope(1), &[]).await;
            assert!(
                matches!(result, Err(SchedulerError::NoAvailableExecutor(_))),
                "{strategy} routed with no addresses"
            );
        }
    }

    #[tokio::test]
    async fn test_every_strategy_picks_a_candidate() {
        let registry = registry();
        let candidates = addresses(&["a1", "a2", "a3"]);
        for strategy in RouteStrategy::ALL {
            let picked = registry
                .select(strategy.as_str(), &envelope(9), &candidates)
                .await
                .unwrap();
            assert!(candidates.contains(&picked));
        }
    }
}
