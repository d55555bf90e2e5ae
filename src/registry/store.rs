//! Persistence contract for registry rows and executor groups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    AddressMode, ExecutorGroup, NewExecutorGroup, RegistryEntry, RegistryKind, RegistryParam,
    UpsertOutcome,
};

/// Store behind the registration gateway and the liveness monitor.
///
/// Both paths write concurrently, so implementations must make `upsert`,
/// `remove` and `delete_dead_before` atomic per row. Backend failures are
/// reported as `SchedulerError::StoreUnavailable`.
#[async_trait]
pub trait RegistryStore: Send + Sync + std::fmt::Debug {
    /// Insert the row or refresh its `last_seen_at` (and load) to `now`
    async fn upsert(&self, param: &RegistryParam, now: DateTime<Utc>) -> Result<UpsertOutcome>;

    /// Delete one row, returning whether it existed
    async fn remove(&self, kind: RegistryKind, key: &str, value: &str) -> Result<bool>;

    /// Delete every row, of any kind, last seen before `cutoff`
    async fn delete_dead_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>>;

    /// Rows of `kind` seen at or after `cutoff`
    async fn list_alive_since(
        &self,
        kind: RegistryKind,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RegistryEntry>>;

    /// Create a group; fails with `InvalidState` when the app name is taken
    async fn create_group(&self, group: NewExecutorGroup, now: DateTime<Utc>)
        -> Result<ExecutorGroup>;

    async fn update_group(&self, group: &ExecutorGroup) -> Result<()>;

    async fn delete_group(&self, id: i64) -> Result<bool>;

    async fn load_group_by_id(&self, id: i64) -> Result<Option<ExecutorGroup>>;

    async fn load_group_by_app_name(&self, app_name: &str) -> Result<Option<ExecutorGroup>>;

    async fn list_groups_by_mode(&self, mode: AddressMode) -> Result<Vec<ExecutorGroup>>;
}
