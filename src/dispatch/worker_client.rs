//! Remote worker contract consumed by routing probes and the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{RunHandle, TriggerEnvelope};

/// Reply from a worker endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    /// Diagnostic on rejection, log snapshot for debug runs
    pub message: Option<String>,
}

impl WorkerResponse {
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn accepted_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Transport to executor processes.
///
/// `Err` means the call itself failed (connection refused, timeout); a worker
/// that answered but declined returns `Ok` with `success == false`. Timeouts in
/// the envelope are enforced here, not by callers.
#[async_trait]
pub trait WorkerClient: Send + Sync + std::fmt::Debug {
    async fn run(&self, address: &str, envelope: &TriggerEnvelope) -> Result<WorkerResponse>;

    async fn debug_run(&self, address: &str, envelope: &TriggerEnvelope)
        -> Result<WorkerResponse>;

    /// Best-effort kill of a running job
    async fn cancel(&self, handle: &RunHandle) -> Result<WorkerResponse>;

    /// Liveness probe
    async fn beat(&self, address: &str) -> Result<WorkerResponse>;

    /// Succeeds only when the worker is not currently running `job_id`
    async fn idle_beat(&self, address: &str, job_id: i64) -> Result<WorkerResponse>;
}
