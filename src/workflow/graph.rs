//! # Workflow Graph
//!
//! Arena of nodes keyed by stable node ids with incoming and outgoing
//! adjacency sets. Every mutation is validated before it is applied, so a
//! rejected mutation leaves the graph exactly as it was and the edge set is
//! always acyclic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

use super::state::NodeState;
use crate::constants::DEFAULT_MAX_WORKFLOW_NODES;
use crate::error::{Result, SchedulerError};

/// A job placed in a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub node_id: i64,
    pub job_id: i64,
    pub state: NodeState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Log id of the latest dispatch of this node
    pub last_run_id: Option<Uuid>,
}

impl WorkflowNode {
    pub fn new(node_id: i64, job_id: i64) -> Self {
        Self {
            node_id,
            job_id,
            state: NodeState::Pending,
            started_at: None,
            ended_at: None,
            failure_reason: None,
            last_run_id: None,
        }
    }

    /// Back to Pending with bookkeeping cleared
    pub fn reset(&mut self) {
        self.state = NodeState::Pending;
        self.started_at = None;
        self.ended_at = None;
        self.failure_reason = None;
        self.last_run_id = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    workflow_id: i64,
    name: String,
    nodes: BTreeMap<i64, WorkflowNode>,
    outgoing: BTreeMap<i64, BTreeSet<i64>>,
    incoming: BTreeMap<i64, BTreeSet<i64>>,
    max_nodes: usize,
}

impl WorkflowGraph {
    pub fn new(workflow_id: i64, name: impl Into<String>) -> Self {
        Self::with_max_nodes(workflow_id, name, DEFAULT_MAX_WORKFLOW_NODES)
    }

    pub fn with_max_nodes(workflow_id: i64, name: impl Into<String>, max_nodes: usize) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            nodes: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            max_nodes,
        }
    }

    /// Build a graph in one go; fails on the first invalid node or edge
    pub fn from_parts(
        workflow_id: i64,
        name: impl Into<String>,
        nodes: impl IntoIterator<Item = (i64, i64)>,
        edges: impl IntoIterator<Item = (i64, i64)>,
        max_nodes: usize,
    ) -> Result<Self> {
        let mut graph = Self::with_max_nodes(workflow_id, name, max_nodes);
        for (node_id, job_id) in nodes {
            graph.add_node(node_id, job_id)?;
        }
        for (from, to) in edges {
            graph.add_edge(from, to)?;
        }
        Ok(graph)
    }

    pub fn workflow_id(&self) -> i64 {
        self.workflow_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, node_id: i64) -> Option<&WorkflowNode> {
        self.nodes.get(&node_id)
    }

    pub(crate) fn node_mut(&mut self, node_id: i64) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(&node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.values()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut WorkflowNode> {
        self.nodes.values_mut()
    }

    pub fn node_ids(&self) -> Vec<i64> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> Vec<(i64, i64)> {
        self.outgoing
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (*from, *to)))
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    pub fn contains_edge(&self, from: i64, to: i64) -> bool {
        self.outgoing
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    pub fn state_of(&self, node_id: i64) -> Option<NodeState> {
        self.nodes.get(&node_id).map(|n| n.state)
    }

    pub fn add_node(&mut self, node_id: i64, job_id: i64) -> Result<()> {
        if self.nodes.contains_key(&node_id) {
            return Err(SchedulerError::invalid_argument(format!(
                "node {node_id} already exists in workflow {}",
                self.workflow_id
            )));
        }
        if self.nodes.len() >= self.max_nodes {
            return Err(SchedulerError::invalid_argument(format!(
                "workflow {} is limited to {} nodes",
                self.workflow_id, self.max_nodes
            )));
        }
        self.nodes.insert(node_id, WorkflowNode::new(node_id, job_id));
        self.outgoing.insert(node_id, BTreeSet::new());
        self.incoming.insert(node_id, BTreeSet::new());
        Ok(())
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, node_id: i64) -> Result<WorkflowNode> {
        let node = self
            .nodes
            .remove(&node_id)
            .ok_or_else(|| SchedulerError::NotFound(format!("node {node_id}")))?;
        for to in self.outgoing.remove(&node_id).unwrap_or_default() {
            if let Some(sources) = self.incoming.get_mut(&to) {
                sources.remove(&node_id);
            }
        }
        for from in self.incoming.remove(&node_id).unwrap_or_default() {
            if let Some(targets) = self.outgoing.get_mut(&from) {
                targets.remove(&node_id);
            }
        }
        Ok(node)
    }

    pub fn add_edge(&mut self, from: i64, to: i64) -> Result<()> {
        if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return Err(SchedulerError::invalid_argument(format!(
                "edge {from} -> {to} references a missing node"
            )));
        }
        if from == to {
            return Err(SchedulerError::invalid_argument(format!(
                "node {from} cannot depend on itself"
            )));
        }
        if self.contains_edge(from, to) {
            return Err(SchedulerError::invalid_argument(format!(
                "edge {from} -> {to} already exists"
            )));
        }
        if self.reaches(to, from) {
            return Err(SchedulerError::invalid_argument(format!(
                "edge {from} -> {to} would create a cycle"
            )));
        }
        self.outgoing.entry(from).or_default().insert(to);
        self.incoming.entry(to).or_default().insert(from);
        Ok(())
    }

    pub fn remove_edge(&mut self, from: i64, to: i64) -> Result<()> {
        let removed = self
            .outgoing
            .get_mut(&from)
            .map(|targets| targets.remove(&to))
            .unwrap_or(false);
        if !removed {
            return Err(SchedulerError::NotFound(format!("edge {from} -> {to}")));
        }
        if let Some(sources) = self.incoming.get_mut(&to) {
            sources.remove(&from);
        }
        Ok(())
    }

    pub fn predecessors(&self, node_id: i64) -> Vec<i64> {
        self.incoming
            .get(&node_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn successors(&self, node_id: i64) -> Vec<i64> {
        self.outgoing
            .get(&node_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes without incoming edges
    pub fn root_nodes(&self) -> Vec<i64> {
        self.incoming
            .iter()
            .filter(|(_, sources)| sources.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Nodes without outgoing edges
    pub fn leaf_nodes(&self) -> Vec<i64> {
        self.outgoing
            .iter()
            .filter(|(_, targets)| targets.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// `node_id` plus every node transitively downstream of it
    pub fn reachable_from(&self, node_id: i64) -> Result<BTreeSet<i64>> {
        if !self.nodes.contains_key(&node_id) {
            return Err(SchedulerError::NotFound(format!("node {node_id}")));
        }
        let mut seen = BTreeSet::from([node_id]);
        let mut stack = vec![node_id];
        while let Some(current) = stack.pop() {
            for next in self.outgoing.get(&current).into_iter().flatten() {
                if seen.insert(*next) {
                    stack.push(*next);
                }
            }
        }
        Ok(seen)
    }

    /// Pending nodes whose predecessors have all succeeded
    pub fn compute_ready_nodes(&self) -> Vec<i64> {
        self.compute_ready_nodes_with(|_| false)
    }

    /// As `compute_ready_nodes`, with `satisfied` marking extra predecessors as met
    pub fn compute_ready_nodes_with<F>(&self, satisfied: F) -> Vec<i64>
    where
        F: Fn(i64) -> bool,
    {
        self.nodes
            .values()
            .filter(|node| node.state == NodeState::Pending)
            .filter(|node| {
                self.incoming
                    .get(&node.node_id)
                    .into_iter()
                    .flatten()
                    .all(|pred| {
                        satisfied(*pred) || self.state_of(*pred) == Some(NodeState::Success)
                    })
            })
            .map(|node| node.node_id)
            .collect()
    }

    /// Kahn's algorithm; lower ids first among nodes that are ready together
    pub fn topological_order(&self) -> Vec<i64> {
        let mut in_degree: BTreeMap<i64, usize> = self
            .incoming
            .iter()
            .map(|(id, sources)| (*id, sources.len()))
            .collect();
        let mut queue: VecDeque<i64> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for next in self.outgoing.get(&current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }
        order
    }

    fn reaches(&self, from: i64, target: i64) -> bool {
        let mut seen = BTreeSet::from([from]);
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            for next in self.outgoing.get(&current).into_iter().flatten() {
                if seen.insert(*next) {
                    stack.push(*next);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A -> B, A -> C, B -> D, C -> D
    fn diamond() -> WorkflowGraph {
        WorkflowGraph::from_parts(
            1,
            "diamond",
            [(1, 101), (2, 102), (3, 103), (4, 104)],
            [(1, 2), (1, 3), (2, 4), (3, 4)],
            10,
        )
        .unwrap()
    }

    #[test]
    fn test_cycle_is_rejected_and_graph_unchanged() {
        let mut graph = diamond();
        let before = graph.clone();

        let result = graph.add_edge(4, 1);
        assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
        assert_eq!(graph, before);
        assert!(graph.add_edge(3, 3).is_err());
        assert_eq!(graph, before);
    }

    #[test]
    fn test_duplicate_node_and_missing_endpoint() {
        let mut graph = diamond();
        assert!(graph.add_node(1, 999).is_err());
        assert!(graph.add_edge(1, 42).is_err());
        assert_eq!(graph.node(1).unwrap().job_id, 101);
    }

    #[test]
    fn test_node_limit() {
        let mut graph = WorkflowGraph::with_max_nodes(1, "small", 2);
        graph.add_node(1, 1).unwrap();
        graph.add_node(2, 2).unwrap();
        assert!(matches!(graph.add_node(3, 3), Err(SchedulerError::InvalidArgument(_))));
    }

    #[test]
    fn test_ready_nodes_follow_success() {
        let mut graph = diamond();
        assert_eq!(graph.compute_ready_nodes(), vec![1]);

        graph.node_mut(1).unwrap().state = NodeState::Success;
        assert_eq!(graph.compute_ready_nodes(), vec![2, 3]);

        graph.node_mut(2).unwrap().state = NodeState::Success;
        // D still waits on C
        assert_eq!(graph.compute_ready_nodes(), vec![3]);
    }

    #[test]
    fn test_ready_nodes_with_satisfied_override() {
        let graph = diamond();
        let ready = graph.compute_ready_nodes_with(|id| id == 1);
        assert_eq!(ready, vec![1, 2, 3]);
    }

    #[test]
    fn test_reachable_from_includes_start() {
        let graph = diamond();
        assert_eq!(graph.reachable_from(2).unwrap(), BTreeSet::from([2, 4]));
        assert_eq!(graph.reachable_from(1).unwrap().len(), 4);
        assert!(graph.reachable_from(9).is_err());
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = diamond();
        graph.remove_node(2).unwrap();
        assert_eq!(graph.edges(), vec![(1, 3), (3, 4)]);
        assert_eq!(graph.predecessors(4), vec![3]);
        assert!(graph.remove_edge(1, 2).is_err());
    }

    #[test]
    fn test_roots_leaves_and_order() {
        let graph = diamond();
        assert_eq!(graph.root_nodes(), vec![1]);
        assert_eq!(graph.leaf_nodes(), vec![4]);
        assert_eq!(graph.topological_order(), vec![1, 2, 3, 4]);
        assert_eq!(graph.successors(1), vec![2, 3]);
    }
}
