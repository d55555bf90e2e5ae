use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Execution state of a single workflow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for predecessors
    Pending,
    /// Dependencies satisfied, about to be dispatched
    Ready,
    /// Dispatched to a worker, awaiting its completion callback
    Running,
    Success,
    Failed,
    /// Foreclosed by an upstream failure or a stop
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Ready or Running; a run cannot finish while any scoped node is active
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid node state: {s}")),
        }
    }
}

/// Status of a workflow execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Never started; the graph may be edited
    Draft,
    Running,
    Success,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

/// Nodes a run is responsible for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunScope {
    WholeGraph,
    /// A rerun-from-node: the start node and everything reachable from it
    Subgraph { from_node: i64, nodes: BTreeSet<i64> },
}

impl RunScope {
    pub fn contains(&self, node_id: i64) -> bool {
        match self {
            RunScope::WholeGraph => true,
            RunScope::Subgraph { nodes, .. } => nodes.contains(&node_id),
        }
    }
}

/// One execution attempt of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub workflow_id: i64,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub scope: RunScope,
}

impl WorkflowRun {
    /// Placeholder run for a workflow that has never been started
    pub fn draft(workflow_id: i64) -> Self {
        Self {
            run_id: Uuid::nil(),
            workflow_id,
            status: RunStatus::Draft,
            started_at: None,
            ended_at: None,
            scope: RunScope::WholeGraph,
        }
    }

    pub fn begin(workflow_id: i64, scope: RunScope) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow_id,
            status: RunStatus::Running,
            started_at: Some(Utc::now()),
            ended_at: None,
            scope,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_classification() {
        assert!(NodeState::Skipped.is_terminal());
        assert!(!NodeState::Ready.is_terminal());
        assert!(NodeState::Ready.is_active());
        assert!(!NodeState::Pending.is_active());
        assert_eq!("failed".parse::<NodeState>(), Ok(NodeState::Failed));
    }

    #[test]
    fn test_subgraph_scope_membership() {
        let scope = RunScope::Subgraph {
            from_node: 2,
            nodes: [2, 4].into_iter().collect(),
        };
        assert!(scope.contains(4));
        assert!(!scope.contains(1));
        assert!(RunScope::WholeGraph.contains(1));
    }
}
