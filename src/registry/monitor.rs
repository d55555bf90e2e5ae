//! # Liveness Monitor
//!
//! Background sweep that expires stale registry rows and republishes the
//! address list of every auto-managed executor group. A tick that fails is
//! logged and the loop carries on; only `stop()` ends it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::RegistryStore;
use crate::config::RegistryConfig;
use crate::constants::events;
use crate::error::{Result, SchedulerError};
use crate::models::{AddressMode, RegistryKind};

/// What a single sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids of registry rows deleted as dead
    pub removed: Vec<i64>,
    /// Auto-managed groups whose address list was rewritten
    pub refreshed_groups: usize,
}

/// Control handles for one running sweep loop
#[derive(Debug)]
struct SweepLoop {
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    join: JoinHandle<()>,
}

#[derive(Debug)]
pub struct LivenessMonitor {
    store: Arc<dyn RegistryStore>,
    beat_interval: Duration,
    dead_timeout: Duration,
    sweep_loop: Mutex<Option<SweepLoop>>,
}

impl LivenessMonitor {
    pub fn new(store: Arc<dyn RegistryStore>, config: &RegistryConfig) -> Self {
        Self::with_intervals(store, config.beat_interval(), config.dead_timeout())
    }

    pub fn with_intervals(
        store: Arc<dyn RegistryStore>,
        beat_interval: Duration,
        dead_timeout: Duration,
    ) -> Self {
        Self {
            store,
            beat_interval,
            dead_timeout,
            sweep_loop: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweep_loop
            .lock()
            .as_ref()
            .map(|l| l.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Run one sweep against the current time
    pub async fn tick(&self) -> Result<SweepReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one sweep as if the clock read `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        sweep(self.store.as_ref(), self.dead_timeout, now).await
    }

    /// Spawn the periodic sweep; must be called from within a tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut slot = self.sweep_loop.lock();
        if slot.is_some() {
            return Err(SchedulerError::InvalidState(
                "Liveness monitor is already running".to_string(),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let shutdown_notify = Arc::new(Notify::new());
        let store = self.store.clone();
        let beat_interval = self.beat_interval;
        let dead_timeout = self.dead_timeout;
        let loop_running = running.clone();
        let loop_notify = shutdown_notify.clone();

        let join = tokio::spawn(async move {
            info!(
                beat_interval_ms = beat_interval.as_millis() as u64,
                dead_timeout_ms = dead_timeout.as_millis() as u64,
                "Liveness monitor started"
            );
            while loop_running.load(Ordering::Acquire) {
                match sweep(store.as_ref(), dead_timeout, Utc::now()).await {
                    Ok(report) => debug!(
                        event = events::REGISTRY_SWEEP_COMPLETED,
                        removed = report.removed.len(),
                        refreshed_groups = report.refreshed_groups,
                        "Registry sweep completed"
                    ),
                    Err(e) => error!(error = %e, "Registry sweep failed, retrying next beat"),
                }

                if !loop_running.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(beat_interval) => {}
                    _ = loop_notify.notified() => break,
                }
            }
            info!("Liveness monitor stopped");
        });

        *slot = Some(SweepLoop {
            running,
            shutdown_notify,
            join,
        });
        Ok(())
    }

    /// Signal the loop, interrupt its sleep and wait for it to return
    pub async fn stop(&self) {
        let Some(sweep_loop) = self.sweep_loop.lock().take() else {
            return;
        };
        sweep_loop.running.store(false, Ordering::Release);
        // notify_one leaves a permit if the loop is mid-sweep rather than asleep
        sweep_loop.shutdown_notify.notify_one();
        if let Err(e) = sweep_loop.join.await {
            warn!(error = %e, "Liveness monitor task ended abnormally");
        }
    }
}

async fn sweep(
    store: &dyn RegistryStore,
    dead_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let dead_timeout = chrono::Duration::from_std(dead_timeout)
        .map_err(|e| SchedulerError::Configuration(format!("dead timeout out of range: {e}")))?;
    let cutoff = now - dead_timeout;

    let removed = store.delete_dead_before(cutoff).await?;

    let mut addresses_by_app: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for entry in store.list_alive_since(RegistryKind::Executor, cutoff).await? {
        addresses_by_app.entry(entry.key).or_default().insert(entry.value);
    }

    let mut refreshed_groups = 0;
    for mut group in store.list_groups_by_mode(AddressMode::Auto).await? {
        let addresses = addresses_by_app
            .get(&group.app_name)
            .map(|set| set.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        group.set_addresses(addresses, now);
        store.update_group(&group).await?;
        refreshed_groups += 1;
    }

    Ok(SweepReport {
        removed,
        refreshed_groups,
    })
}
