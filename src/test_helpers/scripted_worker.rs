//! # Scripted Worker Client
//!
//! In-memory `WorkerClient` that accepts everything by default and records
//! every call. Tests flip individual addresses or jobs into failure modes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::dispatch::{WorkerClient, WorkerResponse};
use crate::error::{Result, SchedulerError};
use crate::models::{RunHandle, TriggerEnvelope};

#[derive(Debug, Default)]
pub struct ScriptedWorkerClient {
    unreachable: Mutex<HashSet<String>>,
    busy: Mutex<HashSet<(String, i64)>>,
    address_rejections: Mutex<HashMap<String, String>>,
    job_rejections: Mutex<HashMap<i64, String>>,
    runs: Mutex<Vec<(String, TriggerEnvelope)>>,
    cancels: Mutex<Vec<Uuid>>,
    beats: Mutex<Vec<String>>,
}

impl ScriptedWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls to `address` fail at the transport level
    pub fn mark_unreachable(&self, address: &str) {
        self.unreachable.lock().insert(address.to_string());
    }

    pub fn mark_reachable(&self, address: &str) {
        self.unreachable.lock().remove(address);
    }

    /// Idle beats for `job_id` on `address` report busy
    pub fn mark_busy(&self, address: &str, job_id: i64) {
        self.busy.lock().insert((address.to_string(), job_id));
    }

    /// Runs on `address` are answered with a rejection carrying `message`
    pub fn reject_runs_on(&self, address: &str, message: &str) {
        self.address_rejections
            .lock()
            .insert(address.to_string(), message.to_string());
    }

    /// Runs of `job_id` are rejected wherever they land
    pub fn reject_job(&self, job_id: i64, message: &str) {
        self.job_rejections.lock().insert(job_id, message.to_string());
    }

    pub fn accept_job(&self, job_id: i64) {
        self.job_rejections.lock().remove(&job_id);
    }

    /// Every accepted run as `(address, envelope)`, in call order
    pub fn runs(&self) -> Vec<(String, TriggerEnvelope)> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn runs_for_job(&self, job_id: i64) -> Vec<TriggerEnvelope> {
        self.runs
            .lock()
            .iter()
            .filter(|(_, envelope)| envelope.job_id == job_id)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    pub fn cancels(&self) -> Vec<Uuid> {
        self.cancels.lock().clone()
    }

    pub fn beats(&self) -> Vec<String> {
        self.beats.lock().clone()
    }

    fn check_reachable(&self, address: &str) -> Result<()> {
        if self.unreachable.lock().contains(address) {
            Err(SchedulerError::dispatch(address, "connection refused"))
        } else {
            Ok(())
        }
    }

    fn rejection_for(&self, address: &str, job_id: i64) -> Option<String> {
        if let Some(message) = self.address_rejections.lock().get(address) {
            return Some(message.clone());
        }
        self.job_rejections.lock().get(&job_id).cloned()
    }
}

#[async_trait]
impl WorkerClient for ScriptedWorkerClient {
    async fn run(&self, address: &str, envelope: &TriggerEnvelope) -> Result<WorkerResponse> {
        self.check_reachable(address)?;
        if let Some(message) = self.rejection_for(address, envelope.job_id) {
            return Ok(WorkerResponse::rejected(message));
        }
        self.runs
            .lock()
            .push((address.to_string(), envelope.clone()));
        Ok(WorkerResponse::accepted())
    }

    async fn debug_run(
        &self,
        address: &str,
        envelope: &TriggerEnvelope,
    ) -> Result<WorkerResponse> {
        self.check_reachable(address)?;
        if let Some(message) = self.rejection_for(address, envelope.job_id) {
            return Ok(WorkerResponse::rejected(message));
        }
        Ok(WorkerResponse::accepted_with(format!(
            "debug run of {} on {} finished",
            envelope.handler, address
        )))
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<WorkerResponse> {
        self.check_reachable(&handle.address)?;
        self.cancels.lock().push(handle.run_id);
        Ok(WorkerResponse::accepted())
    }

    async fn beat(&self, address: &str) -> Result<WorkerResponse> {
        self.beats.lock().push(address.to_string());
        self.check_reachable(address)?;
        Ok(WorkerResponse::accepted())
    }

    async fn idle_beat(&self, address: &str, job_id: i64) -> Result<WorkerResponse> {
        self.check_reachable(address)?;
        if self.busy.lock().contains(&(address.to_string(), job_id)) {
            return Ok(WorkerResponse::rejected(
                "job thread is running or has trigger queue",
            ));
        }
        Ok(WorkerResponse::accepted())
    }
}
