//! Positional strategies that need no outside information.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{no_candidates, RouteStrategyHandler};
use crate::error::Result;
use crate::models::{RouteStrategy, TriggerEnvelope};

#[derive(Debug, Default)]
pub struct FirstRoute;

#[async_trait]
impl RouteStrategyHandler for FirstRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::First
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        addresses.first().cloned().ok_or_else(|| no_candidates(envelope))
    }
}

#[derive(Debug, Default)]
pub struct LastRoute;

#[async_trait]
impl RouteStrategyHandler for LastRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Last
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        addresses.last().cloned().ok_or_else(|| no_candidates(envelope))
    }
}

#[derive(Debug, Default)]
pub struct RandomRoute;

#[async_trait]
impl RouteStrategyHandler for RandomRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Random
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        if addresses.is_empty() {
            return Err(no_candidates(envelope));
        }
        Ok(addresses[fastrand::usize(0..addresses.len())].clone())
    }
}

/// Rotating cursor per job
#[derive(Debug, Default)]
pub struct RoundRobinRoute {
    cursors: DashMap<i64, usize>,
}

impl RoundRobinRoute {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteStrategyHandler for RoundRobinRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Round
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        if addresses.is_empty() {
            return Err(no_candidates(envelope));
        }
        let mut cursor = self.cursors.entry(envelope.job_id).or_insert(0);
        let index = *cursor % addresses.len();
        *cursor = cursor.wrapping_add(1);
        Ok(addresses[index].clone())
    }
}

/// Selection for broadcast jobs; the dispatcher fans the trigger out to every address
#[derive(Debug, Default)]
pub struct ShardingBroadcastRoute;

#[async_trait]
impl RouteStrategyHandler for ShardingBroadcastRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::ShardingBroadcast
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        addresses.first().cloned().ok_or_else(|| no_candidates(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::test_support::{addresses, envelope};

    #[tokio::test]
    async fn test_round_robin_rotates_per_job() {
        let route = RoundRobinRoute::new();
        let candidates = addresses(&["a1", "a2", "a3"]);

        let mut job_one = Vec::new();
        for _ in 0..4 {
            job_one.push(route.route(&envelope(1), &candidates).await.unwrap());
        }
        assert_eq!(job_one, vec!["a1", "a2", "a3", "a1"]);

        // A different job starts from its own cursor
        assert_eq!(route.route(&envelope(2), &candidates).await.unwrap(), "a1");
    }

    #[tokio::test]
    async fn test_round_robin_tolerates_shrinking_list() {
        let route = RoundRobinRoute::new();
        for _ in 0..5 {
            route.route(&envelope(1), &addresses(&["a1", "a2", "a3"])).await.unwrap();
        }
        let picked = route.route(&envelope(1), &addresses(&["a1"])).await.unwrap();
        assert_eq!(picked, "a1");
    }

    #[tokio::test]
    async fn test_first_and_last() {
        let candidates = addresses(&["a1", "a2", "a3"]);
        assert_eq!(FirstRoute.route(&envelope(1), &candidates).await.unwrap(), "a1");
        assert_eq!(LastRoute.route(&envelope(1), &candidates).await.unwrap(), "a3");
    }

    #[tokio::test]
    async fn test_empty_address_list_is_an_error() {
        let round = RoundRobinRoute::new();
        let handlers: [&dyn RouteStrategyHandler; 5] = [
            &FirstRoute,
            &LastRoute,
            &RandomRoute,
            &round,
            &ShardingBroadcastRoute,
        ];
        for handler in handlers {
            assert!(matches!(
                handler.route(&envelope(1), &[]).await,
                Err(crate::error::SchedulerError::NoAvailableExecutor(_))
            ));
        }
        // The cursor did not move
        assert_eq!(round.route(&envelope(1), &addresses(&["a1", "a2"])).await.unwrap(), "a1");
    }
}
