use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{BlockStrategy, GlueType, JobDefinition};

/// Immutable request to run a job once, built fresh for every attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEnvelope {
    pub job_id: i64,
    pub handler: String,
    pub params: String,
    pub block_strategy: BlockStrategy,
    /// Enforced by the transport, 0 means no timeout
    pub timeout_seconds: u64,
    /// Correlation id shared by the run handle and the worker's log
    pub log_id: Uuid,
    pub log_date_time: DateTime<Utc>,
    pub glue_type: GlueType,
    pub glue_source: Option<String>,
    pub glue_updated_at_millis: Option<i64>,
    pub broadcast_index: u32,
    pub broadcast_total: u32,
    /// App name of the executor group the trigger was routed through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl TriggerEnvelope {
    /// Build an envelope from job configuration; `params` overrides the job defaults
    /// and the job's own timeout and block strategy win over the given defaults
    pub fn from_job(
        job: &JobDefinition,
        params: Option<&str>,
        default_timeout_seconds: u64,
        default_block_strategy: BlockStrategy,
    ) -> Self {
        let params = params
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| job.default_params.clone());
        let timeout_seconds = job
            .timeout
            .map(|t| t.as_secs())
            .unwrap_or(default_timeout_seconds);

        Self {
            job_id: job.job_id,
            handler: job.handler.clone(),
            params,
            block_strategy: job.block_strategy.unwrap_or(default_block_strategy),
            timeout_seconds,
            log_id: Uuid::new_v4(),
            log_date_time: Utc::now(),
            glue_type: job.glue.as_ref().map(|g| g.glue_type).unwrap_or(GlueType::Bean),
            glue_source: job.glue.as_ref().map(|g| g.source.clone()),
            glue_updated_at_millis: job.glue.as_ref().map(|g| g.updated_at_millis),
            broadcast_index: 0,
            broadcast_total: 1,
            app_name: None,
        }
    }

    /// Copy of this envelope addressed to one shard of a broadcast
    pub fn for_shard(&self, index: u32, total: u32) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            broadcast_index: index,
            broadcast_total: total,
            ..self.clone()
        }
    }
}

/// Correlates a dispatched trigger with its completion callback
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    /// Same value as the envelope's log id
    pub run_id: Uuid,
    pub job_id: i64,
    pub address: String,
    pub dispatched_at: DateTime<Utc>,
    /// Transport timeout copied from the envelope, 0 means none
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl RunHandle {
    pub fn for_envelope(envelope: &TriggerEnvelope, address: &str) -> Self {
        Self {
            run_id: envelope.log_id,
            job_id: envelope.job_id,
            address: address.to_string(),
            dispatched_at: Utc::now(),
            timeout_seconds: envelope.timeout_seconds,
        }
    }

    /// Instant after which the run counts as lost, if it has a timeout
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.timeout_seconds).ok().filter(|s| *s > 0)?;
        Some(self.dispatched_at + chrono::Duration::seconds(seconds))
    }
}

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {} (job {} @ {})", self.run_id, self.job_id, self.address)
    }
}

/// Result of a dispatch attempt that reached a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched(RunHandle),
    /// Dropped by `DiscardLater` because a run was already in flight
    Discarded,
}

impl DispatchOutcome {
    pub fn handle(&self) -> Option<&RunHandle> {
        match self {
            DispatchOutcome::Dispatched(handle) => Some(handle),
            DispatchOutcome::Discarded => None,
        }
    }
}

/// Completion callback sent by a worker when a run ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub run_id: Uuid,
    pub job_id: i64,
    pub success: bool,
    pub message: Option<String>,
}

impl CompletionReport {
    pub fn success(handle: &RunHandle) -> Self {
        Self {
            run_id: handle.run_id,
            job_id: handle.job_id,
            success: true,
            message: None,
        }
    }

    pub fn failure(handle: &RunHandle, message: impl Into<String>) -> Self {
        Self {
            run_id: handle.run_id,
            job_id: handle.job_id,
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Completion forwarded to dispatcher subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub run_id: Uuid,
    pub job_id: i64,
    /// Address the run was dispatched to, when the dispatcher still knew it
    pub address: Option<String>,
    pub success: bool,
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{GlueSource, GlueType};
    use std::time::Duration;

    #[test]
    fn test_runtime_params_override_defaults() {
        let job = JobDefinition::new(3, 1, "sync").with_default_params("full=false");
        let envelope = TriggerEnvelope::from_job(&job, Some("full=true"), 0, BlockStrategy::SerialExecution);
        assert_eq!(envelope.params, "full=true");

        let envelope = TriggerEnvelope::from_job(&job, Some("  "), 0, BlockStrategy::SerialExecution);
        assert_eq!(envelope.params, "full=false");
    }

    #[test]
    fn test_job_timeout_wins_over_default() {
        let job = JobDefinition::new(3, 1, "sync").with_timeout(Duration::from_secs(45));
        assert_eq!(TriggerEnvelope::from_job(&job, None, 10, BlockStrategy::SerialExecution).timeout_seconds, 45);

        let job = JobDefinition::new(3, 1, "sync");
        assert_eq!(TriggerEnvelope::from_job(&job, None, 10, BlockStrategy::SerialExecution).timeout_seconds, 10);
    }

    #[test]
    fn test_job_block_strategy_wins_over_default() {
        let job = JobDefinition::new(3, 1, "sync");
        let envelope = TriggerEnvelope::from_job(&job, None, 0, BlockStrategy::DiscardLater);
        assert_eq!(envelope.block_strategy, BlockStrategy::DiscardLater);

        let job = job.with_block_strategy(BlockStrategy::CoverEarly);
        let envelope = TriggerEnvelope::from_job(&job, None, 0, BlockStrategy::DiscardLater);
        assert_eq!(envelope.block_strategy, BlockStrategy::CoverEarly);
    }

    #[test]
    fn test_run_handle_deadline_follows_timeout() {
        let job = JobDefinition::new(3, 1, "sync");
        let envelope = TriggerEnvelope::from_job(&job, None, 0, BlockStrategy::SerialExecution);
        assert_eq!(RunHandle::for_envelope(&envelope, "a1").deadline(), None);

        let envelope = TriggerEnvelope::from_job(&job, None, 30, BlockStrategy::SerialExecution);
        let handle = RunHandle::for_envelope(&envelope, "a1");
        assert_eq!(
            handle.deadline(),
            Some(handle.dispatched_at + chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_glue_fields_copied_and_shards_get_fresh_ids() {
        let job = JobDefinition::new(3, 1, "").with_glue(GlueSource {
            glue_type: GlueType::GlueShell,
            source: "echo hi".into(),
            updated_at_millis: 42,
        });
        let envelope = TriggerEnvelope::from_job(&job, None, 0, BlockStrategy::SerialExecution);
        assert_eq!(envelope.glue_type, GlueType::GlueShell);
        assert_eq!(envelope.glue_source.as_deref(), Some("echo hi"));

        let shard = envelope.for_shard(1, 3);
        assert_eq!((shard.broadcast_index, shard.broadcast_total), (1, 3));
        assert_ne!(shard.log_id, envelope.log_id);
    }
}
