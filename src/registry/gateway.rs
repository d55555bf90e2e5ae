//! # Registration Gateway
//!
//! Accepts register/deregister requests from executors and admin nodes and
//! persists them through a bounded queue drained by a small worker pool. When
//! the queue is full the caller runs the mutation itself, so registrations are
//! never dropped under load.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::RegistryStore;
use crate::config::RegistrationPoolConfig;
use crate::constants::events;
use crate::error::{Result, SchedulerError};
use crate::logging::log_registry_operation;
use crate::models::{
    LoadSnapshot, NewExecutorGroup, RegistryKind, RegistryParam, UpsertOutcome,
};

/// A store mutation waiting for a pool worker
#[derive(Debug, Clone)]
enum RegistryCommand {
    Register(RegistryParam),
    Deregister(RegistryParam),
}

impl RegistryCommand {
    fn param(&self) -> &RegistryParam {
        match self {
            RegistryCommand::Register(p) | RegistryCommand::Deregister(p) => p,
        }
    }
}

/// Counters describing how mutations reached the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub queued: u64,
    pub inline: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct GatewayCounters {
    queued: AtomicU64,
    inline: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug)]
pub struct RegistrationGateway {
    store: Arc<dyn RegistryStore>,
    sender: Mutex<Option<mpsc::Sender<RegistryCommand>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<GatewayCounters>,
}

impl RegistrationGateway {
    /// Spawn the worker pool; must be called from within a tokio runtime
    pub fn new(store: Arc<dyn RegistryStore>, pool: &RegistrationPoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(pool.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(GatewayCounters::default());

        let workers = (0..pool.workers.max(1))
            .map(|worker_index| {
                let store = store.clone();
                let receiver = receiver.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let command = { receiver.lock().await.recv().await };
                        let Some(command) = command else {
                            debug!(worker_index, "Registration worker draining complete");
                            break;
                        };
                        if let Err(e) = apply_command(store.as_ref(), &command).await {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            error!(
                                worker_index,
                                registry = %command.param(),
                                error = %e,
                                "Queued registry mutation failed"
                            );
                        }
                    }
                })
            })
            .collect();

        info!(
            workers = pool.workers,
            queue_capacity = pool.queue_capacity,
            "Registration gateway started"
        );

        Self {
            store,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Register (or refresh) an address; persisted asynchronously
    pub async fn register(&self, kind: &str, key: &str, value: &str) -> Result<()> {
        let param = validate(kind, key, value)?;
        self.submit(RegistryCommand::Register(param)).await
    }

    /// Register with a resource snapshot for load-aware routing
    pub async fn register_with_load(
        &self,
        kind: &str,
        key: &str,
        value: &str,
        load: LoadSnapshot,
    ) -> Result<()> {
        let param = validate(kind, key, value)?.with_load(load);
        self.submit(RegistryCommand::Register(param)).await
    }

    pub async fn deregister(&self, kind: &str, key: &str, value: &str) -> Result<()> {
        let param = validate(kind, key, value)?;
        self.submit(RegistryCommand::Deregister(param)).await
    }

    /// Register on the caller's task and report store failures directly
    pub async fn register_now(&self, kind: &str, key: &str, value: &str) -> Result<()> {
        let param = validate(kind, key, value)?;
        self.run_inline(RegistryCommand::Register(param)).await
    }

    pub async fn deregister_now(&self, kind: &str, key: &str, value: &str) -> Result<()> {
        let param = validate(kind, key, value)?;
        self.run_inline(RegistryCommand::Deregister(param)).await
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            inline: self.counters.inline.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for workers to drain what was already accepted
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Registration worker ended abnormally");
            }
        }
        info!("Registration gateway stopped");
    }

    async fn submit(&self, command: RegistryCommand) -> Result<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return self.run_inline(command).await;
        };

        match sender.try_send(command) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(command)) => {
                debug!(registry = %command.param(), "Registration queue full, running inline");
                self.run_inline(command).await
            }
            Err(TrySendError::Closed(command)) => self.run_inline(command).await,
        }
    }

    async fn run_inline(&self, command: RegistryCommand) -> Result<()> {
        self.counters.inline.fetch_add(1, Ordering::Relaxed);
        let result = apply_command(self.store.as_ref(), &command).await;
        if result.is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

fn validate(kind: &str, key: &str, value: &str) -> Result<RegistryParam> {
    if kind.trim().is_empty() || key.trim().is_empty() || value.trim().is_empty() {
        return Err(SchedulerError::invalid_argument(
            "registry kind, key and value must all be non-blank",
        ));
    }
    let kind = kind
        .parse::<RegistryKind>()
        .map_err(SchedulerError::InvalidArgument)?;
    Ok(RegistryParam::new(kind, key.trim(), value.trim()))
}

async fn apply_command(store: &dyn RegistryStore, command: &RegistryCommand) -> Result<()> {
    match command {
        RegistryCommand::Register(param) => {
            let outcome = store.upsert(param, Utc::now()).await?;
            if outcome == UpsertOutcome::Created {
                log_registry_operation(
                    events::REGISTRY_REGISTERED,
                    param.kind.as_str(),
                    &param.key,
                    &param.value,
                    "created",
                );
                if param.kind == RegistryKind::Executor {
                    ensure_group(store, &param.key).await?;
                }
            }
            Ok(())
        }
        RegistryCommand::Deregister(param) => {
            let existed = store.remove(param.kind, &param.key, &param.value).await?;
            log_registry_operation(
                events::REGISTRY_REMOVED,
                param.kind.as_str(),
                &param.key,
                &param.value,
                if existed { "removed" } else { "absent" },
            );
            Ok(())
        }
    }
}

/// Provision an auto-managed group for a newly seen app name
async fn ensure_group(store: &dyn RegistryStore, app_name: &str) -> Result<()> {
    if store.load_group_by_app_name(app_name).await?.is_some() {
        return Ok(());
    }
    match store
        .create_group(NewExecutorGroup::auto_provisioned(app_name), Utc::now())
        .await
    {
        Ok(group) => {
            info!(
                event = events::REGISTRY_GROUP_PROVISIONED,
                group_id = group.id,
                app_name = %group.app_name,
                "Auto-provisioned executor group"
            );
            Ok(())
        }
        // Another registration for the same app won the race
        Err(SchedulerError::InvalidState(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
