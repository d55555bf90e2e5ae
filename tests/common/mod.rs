#![allow(dead_code)]

pub mod strategies;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use jobmesh_core::config::{DispatchConfig, WorkflowConfig};
use jobmesh_core::models::NewExecutorGroup;
use jobmesh_core::test_helpers::ScriptedWorkerClient;
use jobmesh_core::{
    InMemoryJobCatalog, InMemoryRegistryStore, JobDefinition, RegistryStore,
    RouteStrategyRegistry, TriggerDispatcher, WorkflowExecutor,
};

pub const DEAD_TIMEOUT: Duration = Duration::from_secs(90);

/// Store, catalog, scripted workers and a dispatcher wired together
pub struct TestCluster {
    pub store: Arc<InMemoryRegistryStore>,
    pub catalog: Arc<InMemoryJobCatalog>,
    pub client: Arc<ScriptedWorkerClient>,
    pub routes: Arc<RouteStrategyRegistry>,
    pub dispatcher: Arc<TriggerDispatcher>,
    pub group_id: i64,
}

impl TestCluster {
    /// One manual group `etl` with the given addresses
    pub async fn with_addresses(addresses: &[&str]) -> Self {
        jobmesh_core::logging::init_structured_logging();
        let store = Arc::new(InMemoryRegistryStore::new());
        let group = store
            .create_group(
                NewExecutorGroup::manual(
                    "etl",
                    "etl",
                    addresses.iter().map(|a| a.to_string()).collect(),
                ),
                Utc::now(),
            )
            .await
            .expect("group should be created");
        let catalog = Arc::new(InMemoryJobCatalog::new());
        let client = Arc::new(ScriptedWorkerClient::new());
        let routes = Arc::new(RouteStrategyRegistry::new(
            client.clone(),
            store.clone(),
            DEAD_TIMEOUT,
        ));
        let dispatcher = Arc::new(TriggerDispatcher::new(
            catalog.clone(),
            store.clone(),
            routes.clone(),
            client.clone(),
            DispatchConfig {
                serial_wait_timeout_seconds: 1,
                ..DispatchConfig::default()
            },
        ));
        Self {
            store,
            catalog,
            client,
            routes,
            dispatcher,
            group_id: group.id,
        }
    }

    pub fn add_job(&self, job_id: i64) -> JobDefinition {
        let job = JobDefinition::new(job_id, self.group_id, format!("handler{job_id}"));
        self.catalog.insert(job.clone());
        job
    }

    pub fn workflow_executor(&self) -> Arc<WorkflowExecutor> {
        WorkflowExecutor::new(self.dispatcher.clone(), &WorkflowConfig::default())
    }
}

/// Poll `check` until it holds or the deadline passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
