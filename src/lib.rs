#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # JobMesh Core
//!
//! Scheduling core for distributed jobs. Executors announce themselves
//! through heartbeats, a liveness sweep keeps executor groups in sync with
//! who is actually alive, triggers are routed to one executor per group
//! under a per-job blocking policy, and workflows chain jobs into a DAG that
//! advances as completion callbacks arrive.
//!
//! ## Module Organization
//!
//! - [`registry`] - Registration gateway, liveness monitor and the registry store seam
//! - [`routing`] - Address selection strategies (round robin, consistent hash, LFU, LRU, ...)
//! - [`dispatch`] - Trigger dispatcher with block strategies and completion fan-out
//! - [`workflow`] - DAG model and the workflow executor
//! - [`models`] - Registry rows, executor groups, job definitions and trigger envelopes
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobmesh_core::config::SchedulerConfig;
//! use jobmesh_core::registry::{InMemoryRegistryStore, LivenessMonitor, RegistrationGateway};
//!
//! # async fn example() -> jobmesh_core::Result<()> {
//! let config = SchedulerConfig::default();
//! let store = Arc::new(InMemoryRegistryStore::new());
//!
//! let gateway = RegistrationGateway::new(store.clone(), &config.registration_pool);
//! gateway.register("EXECUTOR", "etl", "10.0.0.1:9999").await?;
//!
//! let monitor = LivenessMonitor::new(store, &config.registry);
//! monitor.start()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod registry;
pub mod routing;
pub mod test_helpers;
pub mod workflow;

pub use config::{ConfigManager, SchedulerConfig};
pub use dispatch::{
    DispatchStats, InMemoryJobCatalog, JobCatalog, TriggerDispatcher, WorkerClient,
    WorkerResponse,
};
pub use error::{Result, SchedulerError};
pub use models::{
    BlockStrategy, CompletionEvent, CompletionReport, DispatchOutcome, ExecutorGroup,
    JobDefinition, RegistryEntry, RegistryKind, RouteStrategy, RunHandle, TriggerEnvelope,
};
pub use registry::{
    InMemoryRegistryStore, LivenessMonitor, RegistrationGateway, RegistryStore, SweepReport,
};
pub use routing::{RouteStrategyHandler, RouteStrategyRegistry};
pub use workflow::{
    NodeState, RunStatus, WorkflowExecutor, WorkflowGraph, WorkflowRun, WorkflowSnapshot,
};
