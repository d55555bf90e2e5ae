//! Trigger dispatch to executor processes.

pub mod catalog;
pub mod dispatcher;
pub mod worker_client;

pub use catalog::{InMemoryJobCatalog, JobCatalog};
pub use dispatcher::{DispatchStats, ShardDispatch, TriggerDispatcher};
pub use worker_client::{WorkerClient, WorkerResponse};
