//! # System Constants
//!
//! Operational limits and event names shared by the registry, dispatcher and
//! workflow executor.

use std::time::Duration;

/// Default heartbeat period for executors and the liveness sweep
pub const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default cutoff after which a registry row is considered dead (3 beats)
pub const DEFAULT_DEAD_TIMEOUT: Duration = Duration::from_secs(90);

/// Minimum number of beats that must fit inside the dead timeout
pub const MIN_BEATS_PER_DEAD_TIMEOUT: u64 = 3;

/// Storage limit for an executor group title
pub const GROUP_TITLE_MAX_CHARS: usize = 12;

/// Worker diagnostics longer than this are truncated before being surfaced
pub const HANDLE_MSG_MAX_CHARS: usize = 15_000;

/// Default upper bound on nodes in a single workflow graph
pub const DEFAULT_MAX_WORKFLOW_NODES: usize = 500;

/// Virtual nodes per address on the consistent-hash ring
pub const CONSISTENT_HASH_VIRTUAL_NODES: usize = 100;

/// Default registration pool sizing
pub const DEFAULT_REGISTRATION_WORKERS: usize = 4;
pub const DEFAULT_REGISTRATION_QUEUE_CAPACITY: usize = 2000;

/// Structured event names emitted through tracing
pub mod events {
    pub const REGISTRY_REGISTERED: &str = "registry.registered";
    pub const REGISTRY_REMOVED: &str = "registry.removed";
    pub const REGISTRY_GROUP_PROVISIONED: &str = "registry.group_provisioned";
    pub const REGISTRY_SWEEP_COMPLETED: &str = "registry.sweep_completed";

    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_RERUN: &str = "workflow.rerun";
    pub const WORKFLOW_STOPPED: &str = "workflow.stopped";
    pub const WORKFLOW_FINISHED: &str = "workflow.finished";
    pub const WORKFLOW_RERUN_FROM_NODE: &str = "workflow.rerun_from_node";
    pub const WORKFLOW_NODE_DISPATCHED: &str = "workflow.node_dispatched";
    pub const WORKFLOW_NODE_COMPLETED: &str = "workflow.node_completed";
    pub const WORKFLOW_NODE_FAILED: &str = "workflow.node_failed";
}

/// Truncate `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("data-warehouse-etl", 12), "data-warehou");
        assert_eq!(truncate_chars("short", 12), "short");
        assert_eq!(truncate_chars("调度执行器组名称很长的应用", 4), "调度执行");
    }

    #[test]
    fn test_default_dead_timeout_covers_three_beats() {
        assert!(
            DEFAULT_DEAD_TIMEOUT.as_secs()
                >= DEFAULT_BEAT_INTERVAL.as_secs() * MIN_BEATS_PER_DEAD_TIMEOUT
        );
    }
}
