//! # Workflow DAG
//!
//! Graph model with cycle-checked mutation and the executor that drives runs
//! over it.

pub mod executor;
pub mod graph;
pub mod state;

pub use executor::{WorkflowExecutor, WorkflowSnapshot};
pub use graph::{WorkflowGraph, WorkflowNode};
pub use state::{NodeState, RunScope, RunStatus, WorkflowRun};
