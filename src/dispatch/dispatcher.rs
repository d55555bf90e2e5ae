//! # Trigger Dispatcher
//!
//! Turns a job trigger into a remote run: build the envelope, apply the job's
//! block strategy, resolve an address, call the worker. Completion
//! callbacks come back through [`TriggerDispatcher::complete`] and are fanned
//! out to subscribers.
//!
//! Each job owns a slot holding its in-flight run. The slot's claim mutex is
//! the only lock held across a remote call, and only for that job. A discarded
//! trigger never reaches routing, so it contacts no worker and leaves each
//! strategy's per-job state alone.
//!
//! A slot whose run outlived its timeout, or whose executor left the group, is
//! released on the next trigger and the run is reported as failed.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::catalog::JobCatalog;
use super::worker_client::{WorkerClient, WorkerResponse};
use crate::config::DispatchConfig;
use crate::constants::{truncate_chars, HANDLE_MSG_MAX_CHARS};
use crate::error::{Result, SchedulerError};
use crate::models::{
    BlockStrategy, CompletionEvent, CompletionReport, DispatchOutcome, ExecutorGroup,
    JobDefinition, RunHandle, TriggerEnvelope,
};
use crate::registry::RegistryStore;
use crate::routing::RouteStrategyRegistry;

/// Dispatch counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub discarded: u64,
    pub failed: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// In-flight runs released without a completion callback
    pub expired: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone)]
struct InFlight {
    handle: RunHandle,
    /// False for override addresses, which need not belong to the group
    routed: bool,
}

/// In-flight state for one job
#[derive(Debug)]
struct JobSlot {
    /// Serializes block-strategy decisions and the remote call for this job
    claim: tokio::sync::Mutex<()>,
    current: watch::Sender<Option<InFlight>>,
}

impl JobSlot {
    fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            claim: tokio::sync::Mutex::new(()),
            current,
        }
    }

    fn current(&self) -> Option<InFlight> {
        self.current.borrow().clone()
    }

    fn occupy(&self, run: InFlight) {
        self.current.send_replace(Some(run));
    }

    /// Clear the slot if it still holds `run_id`
    fn release(&self, run_id: Uuid) -> bool {
        self.current.send_if_modified(|current| {
            if current.as_ref().map(|run| run.handle.run_id) == Some(run_id) {
                *current = None;
                true
            } else {
                false
            }
        })
    }
}

/// Result of one shard of a broadcast dispatch
#[derive(Debug)]
pub struct ShardDispatch {
    pub address: String,
    pub result: Result<RunHandle>,
}

#[derive(Debug)]
pub struct TriggerDispatcher {
    catalog: Arc<dyn JobCatalog>,
    store: Arc<dyn RegistryStore>,
    routes: Arc<RouteStrategyRegistry>,
    client: Arc<dyn WorkerClient>,
    config: DispatchConfig,
    slots: DashMap<i64, Arc<JobSlot>>,
    runs: DashMap<Uuid, RunHandle>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CompletionEvent>>>,
    counters: DispatchCounters,
}

impl TriggerDispatcher {
    pub fn new(
        catalog: Arc<dyn JobCatalog>,
        store: Arc<dyn RegistryStore>,
        routes: Arc<RouteStrategyRegistry>,
        client: Arc<dyn WorkerClient>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            routes,
            client,
            config,
            slots: DashMap::new(),
            runs: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            counters: DispatchCounters::default(),
        }
    }

    /// Trigger `job_id` once
    pub async fn dispatch(
        &self,
        job_id: i64,
        params: Option<&str>,
        override_address: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let (job, envelope) = self.prepare(job_id, params).await?;
        self.dispatch_envelope(&job, envelope, override_address).await
    }

    /// Load the job and build its envelope so the caller can record the log id first
    pub async fn prepare(
        &self,
        job_id: i64,
        params: Option<&str>,
    ) -> Result<(JobDefinition, TriggerEnvelope)> {
        let job = self.load_job(job_id).await?;
        let envelope = self.build_envelope(&job, params);
        Ok((job, envelope))
    }

    /// Fresh envelope with a new log id; nothing is sent
    pub fn build_envelope(&self, job: &JobDefinition, params: Option<&str>) -> TriggerEnvelope {
        TriggerEnvelope::from_job(
            job,
            params,
            self.config.default_timeout_seconds,
            self.config.block_strategy(),
        )
    }

    #[instrument(skip(self, job, envelope), fields(job_id = job.job_id, log_id = %envelope.log_id))]
    pub async fn dispatch_envelope(
        &self,
        job: &JobDefinition,
        mut envelope: TriggerEnvelope,
        override_address: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let slot = self
            .slots
            .entry(job.job_id)
            .or_insert_with(|| Arc::new(JobSlot::new()))
            .clone();
        let _claim = slot.claim.lock().await;

        let mut covered = None;
        if let Some(prior) = self.live_in_flight(job, &slot).await {
            match envelope.block_strategy {
                BlockStrategy::DiscardLater => {
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    info!(
                        in_flight = %prior.handle.run_id,
                        "Trigger discarded, job already running"
                    );
                    return Ok(DispatchOutcome::Discarded);
                }
                BlockStrategy::SerialExecution => {
                    if let Err(e) = self.wait_for_idle(&slot, &prior.handle).await {
                        // The run may have passed its deadline while we waited
                        let Some(reason) = self.stale_reason(job, &prior).await else {
                            return Err(e);
                        };
                        self.expire(&prior, reason);
                    }
                }
                BlockStrategy::CoverEarly => covered = Some(prior),
            }
        }

        let override_address = normalize_override(override_address);
        let address = self
            .resolve_address(job, &mut envelope, override_address)
            .await
            .inspect_err(|_| {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            })?;

        // Occupy the slot before the call so a fast completion cannot be lost
        let handle = RunHandle::for_envelope(&envelope, &address);
        slot.occupy(InFlight {
            handle: handle.clone(),
            routed: override_address.is_none(),
        });
        self.runs.insert(handle.run_id, handle.clone());

        match self.client.run(&address, &envelope).await {
            Ok(response) if response.success => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(address = %address, "Trigger accepted");
                if let Some(covered) = covered {
                    self.cancel_in_background(covered.handle);
                }
                Ok(DispatchOutcome::Dispatched(handle))
            }
            outcome => {
                self.runs.remove(&handle.run_id);
                if slot.release(handle.run_id) {
                    // The covered run was never cancelled, so it still owns the job
                    if let Some(covered) = covered {
                        slot.occupy(covered);
                    }
                }
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let message = match outcome {
                    Ok(response) => rejection_message(&response),
                    Err(e) => e.to_string(),
                };
                warn!(address = %address, message = %message, "Trigger failed");
                Err(SchedulerError::dispatch(
                    address,
                    truncate_chars(&message, HANDLE_MSG_MAX_CHARS),
                ))
            }
        }
    }

    /// Synchronous debug execution; returns the worker's log snapshot
    pub async fn debug_run(
        &self,
        job_id: i64,
        params: Option<&str>,
        override_address: Option<&str>,
    ) -> Result<String> {
        let (job, mut envelope) = self.prepare(job_id, params).await?;
        let address = self
            .resolve_address(&job, &mut envelope, normalize_override(override_address))
            .await?;

        let response = self
            .client
            .debug_run(&address, &envelope)
            .await
            .map_err(|e| SchedulerError::dispatch(address.clone(), e.to_string()))?;
        if response.success {
            Ok(truncate_chars(
                response.message.as_deref().unwrap_or_default(),
                HANDLE_MSG_MAX_CHARS,
            ))
        } else {
            Err(SchedulerError::dispatch(
                address,
                truncate_chars(&rejection_message(&response), HANDLE_MSG_MAX_CHARS),
            ))
        }
    }

    /// Send one shard to every live address of the job's group.
    ///
    /// Shards bypass the job slot, so block strategies do not apply.
    pub async fn dispatch_broadcast(
        &self,
        job_id: i64,
        params: Option<&str>,
    ) -> Result<Vec<ShardDispatch>> {
        let job = self.load_job(job_id).await?;
        let group = self.live_group(&job).await?;
        let mut envelope = self.build_envelope(&job, params);
        envelope.app_name = Some(group.app_name);
        let addresses = group.address_list;
        let total = addresses.len() as u32;

        let shards = addresses.into_iter().enumerate().map(|(index, address)| {
            let shard = envelope.for_shard(index as u32, total);
            async move {
                let result = match self.client.run(&address, &shard).await {
                    Ok(response) if response.success => {
                        let handle = RunHandle::for_envelope(&shard, &address);
                        self.runs.insert(handle.run_id, handle.clone());
                        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                        Ok(handle)
                    }
                    Ok(response) => Err(SchedulerError::dispatch(
                        address.clone(),
                        truncate_chars(&rejection_message(&response), HANDLE_MSG_MAX_CHARS),
                    )),
                    Err(e) => Err(SchedulerError::dispatch(address.clone(), e.to_string())),
                };
                if result.is_err() {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                ShardDispatch { address, result }
            }
        });
        Ok(futures::future::join_all(shards).await)
    }

    /// Best-effort kill; frees the job's slot once the worker acknowledges
    pub async fn cancel(&self, handle: &RunHandle) -> Result<()> {
        let response = self
            .client
            .cancel(handle)
            .await
            .map_err(|e| SchedulerError::dispatch(handle.address.clone(), e.to_string()))?;
        if !response.success {
            return Err(SchedulerError::dispatch(
                handle.address.clone(),
                rejection_message(&response),
            ));
        }
        self.runs.remove(&handle.run_id);
        if let Some(slot) = self.slots.get(&handle.job_id) {
            slot.release(handle.run_id);
        }
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Ingest a worker's completion callback
    pub fn complete(&self, report: CompletionReport) {
        let address = self
            .runs
            .remove(&report.run_id)
            .map(|(_, handle)| handle.address);
        if address.is_none() {
            debug!(run_id = %report.run_id, "Completion for unknown or already finished run");
        }
        if let Some(slot) = self.slots.get(&report.job_id) {
            slot.release(report.run_id);
        }
        self.counters.completed.fetch_add(1, Ordering::Relaxed);

        let event = CompletionEvent {
            run_id: report.run_id,
            job_id: report.job_id,
            address,
            success: report.success,
            message: report
                .message
                .map(|m| truncate_chars(&m, HANDLE_MSG_MAX_CHARS)),
            finished_at: Utc::now(),
        };
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Receive every completion ingested from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CompletionEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Run currently occupying the job's slot
    pub fn in_flight(&self, job_id: i64) -> Option<RunHandle> {
        self.slots
            .get(&job_id)
            .and_then(|slot| slot.current())
            .map(|run| run.handle)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    async fn load_job(&self, job_id: i64) -> Result<JobDefinition> {
        self.catalog
            .load_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))
    }

    async fn live_group(&self, job: &JobDefinition) -> Result<ExecutorGroup> {
        let group = self
            .store
            .load_group_by_id(job.group_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("executor group {}", job.group_id)))?;
        if !group.has_live_members() {
            return Err(SchedulerError::NoAvailableExecutor(format!(
                "executor group '{}' has no live members",
                group.app_name
            )));
        }
        Ok(group)
    }

    /// Override address, or the job's strategy applied to its group.
    /// Routed envelopes are stamped with the group's app name.
    async fn resolve_address(
        &self,
        job: &JobDefinition,
        envelope: &mut TriggerEnvelope,
        override_address: Option<&str>,
    ) -> Result<String> {
        if let Some(address) = override_address {
            return Ok(address.to_string());
        }
        let group = self.live_group(job).await?;
        envelope.app_name = Some(group.app_name);
        let strategy_id = if job.route_strategy.trim().is_empty() {
            self.config.default_route_strategy.as_str()
        } else {
            job.route_strategy.as_str()
        };
        self.routes
            .select(strategy_id, envelope, &group.address_list)
            .await
    }

    /// The slot's run, unless it went stale and was released
    async fn live_in_flight(&self, job: &JobDefinition, slot: &JobSlot) -> Option<InFlight> {
        let prior = slot.current()?;
        match self.stale_reason(job, &prior).await {
            Some(reason) => {
                self.expire(&prior, reason);
                None
            }
            None => Some(prior),
        }
    }

    async fn stale_reason(&self, job: &JobDefinition, prior: &InFlight) -> Option<String> {
        if prior.handle.deadline().is_some_and(|deadline| Utc::now() >= deadline) {
            return Some(format!(
                "run timed out after {}s without a completion",
                prior.handle.timeout_seconds
            ));
        }
        if !prior.routed {
            return None;
        }
        match self.store.load_group_by_id(job.group_id).await {
            Ok(Some(group)) if !group.address_list.contains(&prior.handle.address) => {
                Some(format!(
                    "executor {} left group '{}'",
                    prior.handle.address, group.app_name
                ))
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Group lookup failed, keeping in-flight run");
                None
            }
        }
    }

    /// Release a stale run and report it to subscribers as failed
    fn expire(&self, prior: &InFlight, reason: String) {
        warn!(
            run_id = %prior.handle.run_id,
            address = %prior.handle.address,
            reason = %reason,
            "Releasing stale in-flight run"
        );
        self.counters.expired.fetch_add(1, Ordering::Relaxed);
        self.complete(CompletionReport::failure(&prior.handle, reason));
    }

    async fn wait_for_idle(&self, slot: &JobSlot, prior: &RunHandle) -> Result<()> {
        debug!(in_flight = %prior.run_id, "Serial trigger waiting for previous run");
        let mut receiver = slot.current.subscribe();
        let waited = tokio::time::timeout(
            self.config.serial_wait_timeout(),
            receiver.wait_for(|current| current.is_none()),
        )
        .await
        .map(|changed| changed.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SchedulerError::InvalidState(
                "job slot closed while waiting".to_string(),
            )),
            Err(_) => Err(SchedulerError::Timeout(format!(
                "job {} still running {} after {:?}",
                prior.job_id,
                prior.run_id,
                self.config.serial_wait_timeout()
            ))),
        }
    }

    fn cancel_in_background(&self, covered: RunHandle) {
        self.runs.remove(&covered.run_id);
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.cancel(&covered).await {
                Ok(response) if response.success => {
                    debug!(run_id = %covered.run_id, "Covered run cancelled")
                }
                Ok(response) => warn!(
                    run_id = %covered.run_id,
                    message = %rejection_message(&response),
                    "Worker refused to cancel covered run"
                ),
                Err(e) => warn!(run_id = %covered.run_id, error = %e, "Cancel of covered run failed"),
            }
        });
    }
}

fn normalize_override(address: Option<&str>) -> Option<&str> {
    address.map(str::trim).filter(|a| !a.is_empty())
}

fn rejection_message(response: &WorkerResponse) -> String {
    response
        .message
        .clone()
        .unwrap_or_else(|| "worker rejected the trigger".to_string())
}
