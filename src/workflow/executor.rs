//! # Workflow Executor
//!
//! Drives workflow runs to completion. State changes only in response to a
//! command (start, stop, rerun, rerun-from-node, run-task) or a completion
//! event from the dispatcher. Transitions for one workflow are serialized by
//! its own async mutex; the mutex is never held across a dispatch, so
//! different workflows and the dispatcher proceed independently. Cascading
//! dispatches run on their own tasks, so commands return without waiting on a
//! serial job that is still busy elsewhere.
//!
//! A failed node forecloses only its descendants (`Skipped`); independent
//! branches keep running. The run ends once no scoped node is Ready or
//! Running and succeeds only if every scoped node succeeded.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::graph::{WorkflowGraph, WorkflowNode};
use super::state::{NodeState, RunScope, RunStatus, WorkflowRun};
use crate::config::WorkflowConfig;
use crate::constants::{events, truncate_chars, HANDLE_MSG_MAX_CHARS};
use crate::dispatch::TriggerDispatcher;
use crate::error::{Result, SchedulerError};
use crate::logging::log_workflow_operation;
use crate::models::{CompletionEvent, DispatchOutcome, RunHandle};

/// Consistent view of a workflow's graph and its latest run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    pub graph: WorkflowGraph,
    pub run: WorkflowRun,
}

impl WorkflowSnapshot {
    pub fn node_state(&self, node_id: i64) -> Option<NodeState> {
        self.graph.state_of(node_id)
    }
}

/// Whether a node's completion may cascade to its successors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Cascade,
    /// Manual out-of-band trigger of one node
    Single,
}

#[derive(Debug, Clone)]
struct NodeRun {
    workflow_id: i64,
    node_id: i64,
    kind: RunKind,
    handle: Option<RunHandle>,
}

#[derive(Debug)]
struct WorkflowState {
    graph: WorkflowGraph,
    run: WorkflowRun,
}

impl WorkflowState {
    fn scoped_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        let scope = &self.run.scope;
        self.graph.nodes().filter(move |n| scope.contains(n.node_id))
    }

    /// Ready set restricted to the run's scope; predecessors outside it count as met
    fn ready_in_scope(&self) -> Vec<i64> {
        let scope = &self.run.scope;
        self.graph
            .compute_ready_nodes_with(|pred| !scope.contains(pred))
            .into_iter()
            .filter(|id| scope.contains(*id))
            .collect()
    }

    fn skip_descendants(&mut self, node_id: i64) -> Vec<i64> {
        let downstream = self.graph.reachable_from(node_id).unwrap_or_default();
        let now = Utc::now();
        let mut skipped = Vec::new();
        for id in downstream.into_iter().filter(|id| *id != node_id) {
            if let Some(node) = self.graph.node_mut(id) {
                if !node.state.is_terminal() && node.state != NodeState::Running {
                    node.state = NodeState::Skipped;
                    node.ended_at = Some(now);
                    skipped.push(id);
                }
            }
        }
        skipped
    }

    /// Close the run once nothing in scope can make progress
    fn finish_if_idle(&mut self) -> Option<RunStatus> {
        if !self.run.status.is_running() || self.scoped_nodes().any(|n| n.state.is_active()) {
            return None;
        }
        let status = if self.scoped_nodes().all(|n| n.state == NodeState::Success) {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.run.finish(status);
        log_workflow_operation(
            events::WORKFLOW_FINISHED,
            self.graph.workflow_id(),
            None,
            status.to_string().as_str(),
            None,
        );
        Some(status)
    }

    fn ensure_editable(&self) -> Result<()> {
        if self.run.status.is_running() {
            return Err(SchedulerError::InvalidState(format!(
                "workflow {} is running and cannot be edited",
                self.graph.workflow_id()
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct WorkflowExecutor {
    me: Weak<Self>,
    dispatcher: Arc<TriggerDispatcher>,
    workflows: DashMap<i64, Arc<Mutex<WorkflowState>>>,
    runs: DashMap<Uuid, NodeRun>,
    max_nodes: usize,
}

impl WorkflowExecutor {
    pub fn new(dispatcher: Arc<TriggerDispatcher>, config: &WorkflowConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            dispatcher,
            workflows: DashMap::new(),
            runs: DashMap::new(),
            max_nodes: config.max_nodes,
        })
    }

    // ----- workflow CRUD -----

    pub fn create_workflow(&self, workflow_id: i64, name: &str) -> Result<()> {
        self.insert_workflow(WorkflowGraph::with_max_nodes(workflow_id, name, self.max_nodes))
    }

    /// Register a pre-built graph
    pub fn insert_workflow(&self, graph: WorkflowGraph) -> Result<()> {
        let workflow_id = graph.workflow_id();
        match self.workflows.entry(workflow_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SchedulerError::invalid_argument(
                format!("workflow {workflow_id} already exists"),
            )),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(WorkflowState {
                    graph,
                    run: WorkflowRun::draft(workflow_id),
                })));
                Ok(())
            }
        }
    }

    pub async fn delete_workflow(&self, workflow_id: i64) -> Result<()> {
        let state = self.state_handle(workflow_id)?;
        state.lock().await.ensure_editable()?;
        self.workflows.remove(&workflow_id);
        self.runs.retain(|_, run| run.workflow_id != workflow_id);
        Ok(())
    }

    pub async fn add_node(&self, workflow_id: i64, node_id: i64, job_id: i64) -> Result<()> {
        self.edit(workflow_id, |graph| graph.add_node(node_id, job_id))
            .await
    }

    pub async fn remove_node(&self, workflow_id: i64, node_id: i64) -> Result<()> {
        self.edit(workflow_id, |graph| graph.remove_node(node_id).map(|_| ()))
            .await
    }

    pub async fn add_edge(&self, workflow_id: i64, from: i64, to: i64) -> Result<()> {
        self.edit(workflow_id, |graph| graph.add_edge(from, to)).await
    }

    pub async fn remove_edge(&self, workflow_id: i64, from: i64, to: i64) -> Result<()> {
        self.edit(workflow_id, |graph| graph.remove_edge(from, to))
            .await
    }

    pub async fn workflow_snapshot(&self, workflow_id: i64) -> Result<WorkflowSnapshot> {
        let state = self.state_handle(workflow_id)?;
        let guard = state.lock().await;
        Ok(WorkflowSnapshot {
            graph: guard.graph.clone(),
            run: guard.run.clone(),
        })
    }

    pub async fn run_status(&self, workflow_id: i64) -> Result<RunStatus> {
        let state = self.state_handle(workflow_id)?;
        let status = state.lock().await.run.status;
        Ok(status)
    }

    /// Pending nodes of the current scope whose dependencies are satisfied
    pub async fn ready_tasks(&self, workflow_id: i64) -> Result<Vec<i64>> {
        let state = self.state_handle(workflow_id)?;
        let ready = state.lock().await.ready_in_scope();
        Ok(ready)
    }

    // ----- run commands -----

    /// Start a fresh run over the whole graph
    #[instrument(skip(self))]
    pub async fn start(&self, workflow_id: i64) -> Result<WorkflowRun> {
        self.begin_whole_run(workflow_id, events::WORKFLOW_STARTED).await
    }

    /// Run the whole graph again after a previous run ended
    #[instrument(skip(self))]
    pub async fn rerun(&self, workflow_id: i64) -> Result<WorkflowRun> {
        self.begin_whole_run(workflow_id, events::WORKFLOW_RERUN).await
    }

    /// Reset `node_id` and everything downstream of it, then run that subgraph
    #[instrument(skip(self))]
    pub async fn rerun_from_node(&self, workflow_id: i64, node_id: i64) -> Result<WorkflowRun> {
        let state = self.state_handle(workflow_id)?;
        let run = {
            let mut guard = state.lock().await;
            if guard.run.status.is_running() {
                return Err(SchedulerError::InvalidState(format!(
                    "workflow {workflow_id} is already running"
                )));
            }
            let nodes = guard.graph.reachable_from(node_id)?;
            for id in &nodes {
                if let Some(node) = guard.graph.node_mut(*id) {
                    node.reset();
                }
            }
            log_workflow_operation(
                events::WORKFLOW_RERUN_FROM_NODE,
                workflow_id,
                Some(node_id),
                "running",
                Some(&format!("{} node(s) reset", nodes.len())),
            );
            guard.run = WorkflowRun::begin(
                workflow_id,
                RunScope::Subgraph {
                    from_node: node_id,
                    nodes,
                },
            );
            guard.run.clone()
        };
        self.advance(workflow_id).await?;
        Ok(run)
    }

    /// Mark the run Stopped, skip unfinished nodes and ask workers to cancel
    #[instrument(skip(self))]
    pub async fn stop(&self, workflow_id: i64) -> Result<()> {
        let state = self.state_handle(workflow_id)?;
        let to_cancel = {
            let mut guard = state.lock().await;
            if !guard.run.status.is_running() {
                return Err(SchedulerError::InvalidState(format!(
                    "workflow {workflow_id} is not running"
                )));
            }

            let scope = guard.run.scope.clone();
            let now = Utc::now();
            let mut running_runs = Vec::new();
            for node in guard.graph.nodes_mut() {
                if !scope.contains(node.node_id) || node.state.is_terminal() {
                    continue;
                }
                if node.state == NodeState::Running {
                    running_runs.extend(node.last_run_id);
                }
                node.state = NodeState::Skipped;
                node.ended_at = Some(now);
            }
            guard.run.finish(RunStatus::Stopped);
            log_workflow_operation(events::WORKFLOW_STOPPED, workflow_id, None, "stopped", None);

            running_runs
                .into_iter()
                .filter_map(|run_id| self.runs.remove(&run_id))
                .filter_map(|(_, run)| run.handle)
                .collect::<Vec<_>>()
        };

        // Advisory: the run is Stopped whatever the workers answer
        for handle in to_cancel {
            if let Err(e) = self.dispatcher.cancel(&handle).await {
                warn!(run_id = %handle.run_id, error = %e, "Cancel of running node failed");
            }
        }
        Ok(())
    }

    /// Trigger one node manually; successors are not dispatched and siblings are untouched
    #[instrument(skip(self))]
    pub async fn run_task(&self, workflow_id: i64, node_id: i64) -> Result<()> {
        let state = self.state_handle(workflow_id)?;
        let job_id = {
            let mut guard = state.lock().await;
            let node = guard
                .graph
                .node_mut(node_id)
                .ok_or_else(|| SchedulerError::NotFound(format!("node {node_id}")))?;
            if node.state.is_active() {
                return Err(SchedulerError::InvalidState(format!(
                    "node {node_id} is already {}",
                    node.state
                )));
            }
            node.reset();
            node.state = NodeState::Ready;
            node.job_id
        };
        self.dispatch_node(workflow_id, node_id, job_id, RunKind::Single)
            .await
    }

    // ----- completion handling -----

    /// Subscribe to dispatcher completions and handle each on its own task
    pub fn spawn_completion_listener(&self) -> JoinHandle<()> {
        let mut events = self.dispatcher.subscribe();
        let weak = self.me.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(executor) = weak.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    if let Err(e) = executor.handle_completion(&event).await {
                        warn!(run_id = %event.run_id, error = %e, "Completion handling failed");
                    }
                });
            }
            debug!("Workflow completion listener finished");
        })
    }

    /// Apply a node's completion and dispatch whatever it unblocked
    pub async fn handle_completion(&self, event: &CompletionEvent) -> Result<()> {
        let Some((_, node_run)) = self.runs.remove(&event.run_id) else {
            debug!(run_id = %event.run_id, "Completion not owned by any workflow");
            return Ok(());
        };
        let workflow_id = node_run.workflow_id;
        let node_id = node_run.node_id;
        let state = self.state_handle(workflow_id)?;

        let cascade = {
            let mut guard = state.lock().await;
            if node_run.kind == RunKind::Cascade && !guard.run.status.is_running() {
                debug!(workflow_id, node_id, "Dropping completion for a finished run");
                return Ok(());
            }

            let Some(node) = guard.graph.node_mut(node_id) else {
                return Ok(());
            };
            if node.last_run_id != Some(event.run_id) || !node.state.is_active() {
                return Ok(());
            }
            node.ended_at = Some(event.finished_at);
            if event.success {
                node.state = NodeState::Success;
            } else {
                node.state = NodeState::Failed;
                node.failure_reason = Some(
                    event
                        .message
                        .as_deref()
                        .map(|m| truncate_chars(m, HANDLE_MSG_MAX_CHARS))
                        .unwrap_or_else(|| "job failed".to_string()),
                );
            }

            log_workflow_operation(
                if event.success {
                    events::WORKFLOW_NODE_COMPLETED
                } else {
                    events::WORKFLOW_NODE_FAILED
                },
                workflow_id,
                Some(node_id),
                if event.success { "success" } else { "failed" },
                event.message.as_deref(),
            );

            match (node_run.kind, event.success) {
                (RunKind::Cascade, true) => true,
                (RunKind::Cascade, false) => {
                    let skipped = guard.skip_descendants(node_id);
                    debug!(workflow_id, node_id, ?skipped, "Downstream nodes skipped");
                    guard.finish_if_idle();
                    false
                }
                (RunKind::Single, _) => {
                    guard.finish_if_idle();
                    false
                }
            }
        };

        if cascade {
            self.advance(workflow_id).await?;
        }
        Ok(())
    }

    // ----- internals -----

    fn state_handle(&self, workflow_id: i64) -> Result<Arc<Mutex<WorkflowState>>> {
        self.workflows
            .get(&workflow_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| SchedulerError::NotFound(format!("workflow {workflow_id}")))
    }

    async fn edit<F>(&self, workflow_id: i64, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowGraph) -> Result<()>,
    {
        let state = self.state_handle(workflow_id)?;
        let mut guard = state.lock().await;
        guard.ensure_editable()?;
        mutate(&mut guard.graph)
    }

    async fn begin_whole_run(&self, workflow_id: i64, operation: &str) -> Result<WorkflowRun> {
        let state = self.state_handle(workflow_id)?;
        let run = {
            let mut guard = state.lock().await;
            if guard.run.status.is_running() {
                return Err(SchedulerError::InvalidState(format!(
                    "workflow {workflow_id} is already running"
                )));
            }
            if guard.graph.node_count() == 0 {
                return Err(SchedulerError::InvalidState(format!(
                    "workflow {workflow_id} has no nodes"
                )));
            }
            for node in guard.graph.nodes_mut() {
                node.reset();
            }
            guard.run = WorkflowRun::begin(workflow_id, RunScope::WholeGraph);
            log_workflow_operation(operation, workflow_id, None, "running", None);
            guard.run.clone()
        };
        self.advance(workflow_id).await?;
        Ok(run)
    }

    /// Mark the current ready set Ready and dispatch each node on its own task
    async fn advance(&self, workflow_id: i64) -> Result<()> {
        let state = self.state_handle(workflow_id)?;
        let batch: Vec<(i64, i64)> = {
            let mut guard = state.lock().await;
            if !guard.run.status.is_running() {
                return Ok(());
            }
            let ready = guard.ready_in_scope();
            if ready.is_empty() {
                guard.finish_if_idle();
                return Ok(());
            }
            ready
                .into_iter()
                .filter_map(|id| {
                    let node = guard.graph.node_mut(id)?;
                    node.state = NodeState::Ready;
                    Some((id, node.job_id))
                })
                .collect()
        };

        let Some(executor) = self.me.upgrade() else {
            return Ok(());
        };
        for (node_id, job_id) in batch {
            let executor = executor.clone();
            tokio::spawn(async move {
                if let Err(e) = executor
                    .dispatch_node(workflow_id, node_id, job_id, RunKind::Cascade)
                    .await
                {
                    debug!(workflow_id, node_id, error = %e, "Node dispatch failed, recorded on the node");
                }
            });
        }
        Ok(())
    }

    /// Dispatch a node already marked Ready. Failures are recorded on the node and returned.
    async fn dispatch_node(
        &self,
        workflow_id: i64,
        node_id: i64,
        job_id: i64,
        kind: RunKind,
    ) -> Result<()> {
        let state = self.state_handle(workflow_id)?;
        let (job, envelope) = match self.dispatcher.prepare(job_id, None).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.record_dispatch_failure(&state, node_id, None, kind, &e)
                    .await;
                return Err(e);
            }
        };

        let run_id = envelope.log_id;
        {
            let mut guard = state.lock().await;
            match guard.graph.node_mut(node_id) {
                Some(node) if node.state == NodeState::Ready => node.last_run_id = Some(run_id),
                // Stopped or edited away while we were loading the job
                _ => return Ok(()),
            }
        }
        self.runs.insert(
            run_id,
            NodeRun {
                workflow_id,
                node_id,
                kind,
                handle: None,
            },
        );

        let error = match self.dispatcher.dispatch_envelope(&job, envelope, None).await {
            Ok(DispatchOutcome::Dispatched(handle)) => {
                self.mark_running(&state, node_id, handle).await;
                return Ok(());
            }
            Ok(DispatchOutcome::Discarded) => SchedulerError::InvalidState(format!(
                "trigger for job {job_id} discarded, previous run still in flight"
            )),
            Err(e) => e,
        };
        self.runs.remove(&run_id);
        self.record_dispatch_failure(&state, node_id, Some(run_id), kind, &error)
            .await;
        Err(error)
    }

    async fn mark_running(&self, state: &Mutex<WorkflowState>, node_id: i64, handle: RunHandle) {
        let run_id = handle.run_id;
        let mut guard = state.lock().await;
        let workflow_id = guard.graph.workflow_id();
        let still_ours = guard
            .graph
            .node(node_id)
            .map(|n| n.state == NodeState::Ready && n.last_run_id == Some(run_id))
            .unwrap_or(false);

        if still_ours {
            if let Some(node) = guard.graph.node_mut(node_id) {
                node.state = NodeState::Running;
                node.started_at = Some(Utc::now());
            }
            if let Some(mut run) = self.runs.get_mut(&run_id) {
                run.handle = Some(handle.clone());
            }
            log_workflow_operation(
                events::WORKFLOW_NODE_DISPATCHED,
                workflow_id,
                Some(node_id),
                "running",
                Some(&handle.address),
            );
        } else if self.runs.remove(&run_id).is_some() {
            // Stopped while the call was in flight and no completion arrived yet
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.cancel(&handle).await {
                    warn!(run_id = %handle.run_id, error = %e, "Cancel of orphaned run failed");
                }
            });
        }
    }

    async fn record_dispatch_failure(
        &self,
        state: &Mutex<WorkflowState>,
        node_id: i64,
        run_id: Option<Uuid>,
        kind: RunKind,
        error: &SchedulerError,
    ) {
        let mut guard = state.lock().await;
        let workflow_id = guard.graph.workflow_id();
        let Some(node) = guard.graph.node_mut(node_id) else {
            return;
        };
        if node.state != NodeState::Ready || (run_id.is_some() && node.last_run_id != run_id) {
            return;
        }
        let reason = truncate_chars(&error.to_string(), HANDLE_MSG_MAX_CHARS);
        node.state = NodeState::Failed;
        node.ended_at = Some(Utc::now());
        node.failure_reason = Some(reason.clone());
        log_workflow_operation(
            events::WORKFLOW_NODE_FAILED,
            workflow_id,
            Some(node_id),
            "failed",
            Some(&reason),
        );

        if kind == RunKind::Cascade {
            guard.skip_descendants(node_id);
        }
        guard.finish_if_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::dispatch::InMemoryJobCatalog;
    use crate::models::{CompletionReport, JobDefinition, NewExecutorGroup};
    use crate::registry::{InMemoryRegistryStore, RegistryStore};
    use crate::routing::RouteStrategyRegistry;
    use crate::test_helpers::ScriptedWorkerClient;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        executor: Arc<WorkflowExecutor>,
        dispatcher: Arc<TriggerDispatcher>,
        client: Arc<ScriptedWorkerClient>,
        events: UnboundedReceiver<CompletionEvent>,
    }

    impl Harness {
        async fn new(job_ids: &[i64]) -> Self {
            let store = Arc::new(InMemoryRegistryStore::new());
            let group = store
                .create_group(
                    NewExecutorGroup::manual("etl", "etl", vec!["a1".into(), "a2".into()]),
                    Utc::now(),
                )
                .await
                .unwrap();
            let catalog = Arc::new(InMemoryJobCatalog::with_jobs(
                job_ids
                    .iter()
                    .map(|id| JobDefinition::new(*id, group.id, format!("handler{id}"))),
            ));
            let client = Arc::new(ScriptedWorkerClient::new());
            let routes = Arc::new(RouteStrategyRegistry::new(
                client.clone(),
                store.clone(),
                Duration::from_secs(90),
            ));
            let dispatcher = Arc::new(TriggerDispatcher::new(
                catalog,
                store,
                routes,
                client.clone(),
                DispatchConfig {
                    serial_wait_timeout_seconds: 1,
                    ..DispatchConfig::default()
                },
            ));
            let events = dispatcher.subscribe();
            let executor = WorkflowExecutor::new(dispatcher.clone(), &WorkflowConfig::default());
            Self {
                executor,
                dispatcher,
                client,
                events,
            }
        }

        /// A -> B, A -> C, B -> D, C -> D with node ids 1..=4 running jobs 11..=14
        async fn diamond() -> Self {
            let harness = Self::new(&[11, 12, 13, 14]).await;
            let graph = WorkflowGraph::from_parts(
                1,
                "diamond",
                [(1, 11), (2, 12), (3, 13), (4, 14)],
                [(1, 2), (1, 3), (2, 4), (3, 4)],
                10,
            )
            .unwrap();
            harness.executor.insert_workflow(graph).unwrap();
            harness
        }

        async fn state(&self, node_id: i64) -> NodeState {
            self.executor
                .workflow_snapshot(1)
                .await
                .unwrap()
                .node_state(node_id)
                .unwrap()
        }

        /// Wait for a spawned dispatch to land
        async fn settle(&self, node_id: i64, state: NodeState) {
            for _ in 0..200 {
                if self.state(node_id).await == state {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("node {node_id} never reached {state}");
        }

        async fn settle_run(&self, status: RunStatus) {
            for _ in 0..200 {
                if self.executor.run_status(1).await.unwrap() == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("run never reached {status}");
        }

        /// Report the node's current run as finished and feed the event back
        async fn finish(&mut self, node_id: i64, success: bool) {
            let snapshot = self.executor.workflow_snapshot(1).await.unwrap();
            let node = snapshot.graph.node(node_id).unwrap();
            let report = CompletionReport {
                run_id: node.last_run_id.unwrap(),
                job_id: node.job_id,
                success,
                message: (!success).then(|| "exit code 1".to_string()),
            };
            self.dispatcher.complete(report);
            let event = self.events.recv().await.unwrap();
            self.executor.handle_completion(&event).await.unwrap();
        }

        /// Wait for the node to run, then finish it
        async fn run_and_finish(&mut self, node_id: i64, success: bool) {
            self.settle(node_id, NodeState::Running).await;
            self.finish(node_id, success).await;
        }
    }

    #[tokio::test]
    async fn test_start_dispatches_roots_only() {
        let h = Harness::diamond().await;
        let run = h.executor.start(1).await.unwrap();

        assert_eq!(run.status, RunStatus::Running);
        h.settle(1, NodeState::Running).await;
        assert_eq!(h.state(2).await, NodeState::Pending);
        assert_eq!(h.client.run_count(), 1);
        assert!(matches!(
            h.executor.start(1).await,
            Err(SchedulerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_branch_failure_skips_join_and_fails_run() {
        let mut h = Harness::diamond().await;
        h.executor.start(1).await.unwrap();

        h.run_and_finish(1, true).await;
        h.settle(2, NodeState::Running).await;
        h.settle(3, NodeState::Running).await;

        h.finish(2, false).await;
        assert_eq!(h.state(4).await, NodeState::Skipped);
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Running);

        h.finish(3, true).await;
        assert_eq!(h.state(3).await, NodeState::Success);
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Failed);
        assert!(h.client.runs_for_job(14).is_empty());
    }

    #[tokio::test]
    async fn test_all_success_completes_run() {
        let mut h = Harness::diamond().await;
        h.executor.start(1).await.unwrap();
        for node in [1, 2, 3, 4] {
            h.run_and_finish(node, true).await;
        }

        let snapshot = h.executor.workflow_snapshot(1).await.unwrap();
        assert_eq!(snapshot.run.status, RunStatus::Success);
        assert!(snapshot.run.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_stop_skips_unfinished_and_drops_late_completion() {
        let mut h = Harness::diamond().await;
        h.executor.start(1).await.unwrap();
        h.settle(1, NodeState::Running).await;
        let running = h
            .executor
            .workflow_snapshot(1)
            .await
            .unwrap()
            .graph
            .node(1)
            .unwrap()
            .last_run_id
            .unwrap();

        h.executor.stop(1).await.unwrap();
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Stopped);
        assert_eq!(h.client.cancels(), vec![running]);
        for node in 1..=4 {
            assert_eq!(h.state(node).await, NodeState::Skipped);
        }

        // The worker reports anyway; nothing changes
        h.finish(1, true).await;
        assert_eq!(h.state(1).await, NodeState::Skipped);
        assert!(h.executor.stop(1).await.is_err());
    }

    #[tokio::test]
    async fn test_rerun_from_node_resets_only_downstream() {
        let mut h = Harness::diamond().await;
        h.executor.start(1).await.unwrap();
        h.run_and_finish(1, true).await;
        h.run_and_finish(2, false).await;
        h.run_and_finish(3, true).await;
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Failed);

        let run = h.executor.rerun_from_node(1, 2).await.unwrap();
        assert_eq!(
            run.scope,
            RunScope::Subgraph {
                from_node: 2,
                nodes: [2, 4].into_iter().collect()
            }
        );
        assert_eq!(h.state(1).await, NodeState::Success);
        assert_eq!(h.state(3).await, NodeState::Success);
        h.settle(2, NodeState::Running).await;
        assert_eq!(h.state(4).await, NodeState::Pending);

        h.finish(2, true).await;
        h.run_and_finish(4, true).await;
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Success);
    }

    #[tokio::test]
    async fn test_rerun_from_node_rejected_while_running() {
        let h = Harness::diamond().await;
        h.executor.start(1).await.unwrap();
        assert!(matches!(
            h.executor.rerun_from_node(1, 2).await,
            Err(SchedulerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_run_task_does_not_cascade() {
        let mut h = Harness::diamond().await;
        h.executor.run_task(1, 2).await.unwrap();
        assert_eq!(h.state(2).await, NodeState::Running);
        assert_eq!(h.state(1).await, NodeState::Pending);

        h.finish(2, true).await;
        assert_eq!(h.state(2).await, NodeState::Success);
        assert_eq!(h.state(4).await, NodeState::Pending);
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Draft);
        assert_eq!(h.client.run_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_node_failed() {
        let h = Harness::diamond().await;
        h.client.reject_job(11, "job handler [handler11] not found");
        h.executor.start(1).await.unwrap();
        h.settle_run(RunStatus::Failed).await;

        let snapshot = h.executor.workflow_snapshot(1).await.unwrap();
        let root = snapshot.graph.node(1).unwrap();
        assert_eq!(root.state, NodeState::Failed);
        assert!(root.failure_reason.as_deref().unwrap().contains("not found"));
        assert_eq!(snapshot.node_state(4), Some(NodeState::Skipped));
    }

    #[tokio::test]
    async fn test_nodes_sharing_a_serial_job_do_not_block_start() {
        let mut h = Harness::new(&[11]).await;
        let graph = WorkflowGraph::from_parts(1, "shared", [(1, 11), (2, 11)], Vec::<(i64, i64)>::new(), 10).unwrap();
        h.executor.insert_workflow(graph).unwrap();

        tokio::time::timeout(Duration::from_millis(200), h.executor.start(1))
            .await
            .expect("start should not wait for the job's previous run")
            .unwrap();

        // One node holds the job; the other queues behind it
        let mut first = None;
        for _ in 0..200 {
            let snapshot = h.executor.workflow_snapshot(1).await.unwrap();
            first = [1, 2]
                .into_iter()
                .find(|id| snapshot.node_state(*id) == Some(NodeState::Running));
            if first.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let first = first.expect("one node should be running");
        let second = if first == 1 { 2 } else { 1 };
        assert_eq!(h.state(second).await, NodeState::Ready);
        assert_eq!(h.client.run_count(), 1);

        h.finish(first, true).await;
        h.run_and_finish(second, true).await;
        assert_eq!(h.executor.run_status(1).await.unwrap(), RunStatus::Success);
        assert_eq!(h.client.run_count(), 2);
    }

    #[tokio::test]
    async fn test_edits_rejected_while_running() {
        let h = Harness::diamond().await;
        h.executor.start(1).await.unwrap();
        assert!(h.executor.add_node(1, 5, 15).await.is_err());
        assert!(h.executor.delete_workflow(1).await.is_err());

        h.executor.stop(1).await.unwrap();
        h.executor.add_node(1, 5, 15).await.unwrap();
        h.executor.add_edge(1, 4, 5).await.unwrap();
        assert!(h.executor.add_edge(1, 5, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_ready_tasks_reflect_scope() {
        let h = Harness::diamond().await;
        assert_eq!(h.executor.ready_tasks(1).await.unwrap(), vec![1]);
        assert!(h.executor.ready_tasks(99).await.is_err());
    }
}
