//! Strategies that ask workers before choosing them.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::RouteStrategyHandler;
use crate::dispatch::WorkerClient;
use crate::error::{Result, SchedulerError};
use crate::models::{RouteStrategy, TriggerEnvelope};

/// First address that answers a liveness beat
#[derive(Debug)]
pub struct FailoverRoute {
    client: Arc<dyn WorkerClient>,
}

impl FailoverRoute {
    pub fn new(client: Arc<dyn WorkerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RouteStrategyHandler for FailoverRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Failover
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        for address in addresses {
            match self.client.beat(address).await {
                Ok(response) if response.success => return Ok(address.clone()),
                Ok(response) => debug!(
                    job_id = envelope.job_id,
                    address = %address,
                    message = ?response.message,
                    "Beat rejected, trying next address"
                ),
                Err(e) => debug!(
                    job_id = envelope.job_id,
                    address = %address,
                    error = %e,
                    "Beat failed, trying next address"
                ),
            }
        }
        Err(SchedulerError::NoAvailableExecutor(format!(
            "no executor answered the liveness beat for job {}",
            envelope.job_id
        )))
    }
}

/// First address that is not already running this job
#[derive(Debug)]
pub struct BusyoverRoute {
    client: Arc<dyn WorkerClient>,
}

impl BusyoverRoute {
    pub fn new(client: Arc<dyn WorkerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RouteStrategyHandler for BusyoverRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::Busyover
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        for address in addresses {
            match self.client.idle_beat(address, envelope.job_id).await {
                Ok(response) if response.success => return Ok(address.clone()),
                Ok(_) | Err(_) => {
                    debug!(job_id = envelope.job_id, address = %address, "Executor busy");
                }
            }
        }
        Err(SchedulerError::NoAvailableExecutor(format!(
            "every executor is busy with job {}",
            envelope.job_id
        )))
    }
}
