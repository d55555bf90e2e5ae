//! # In-Memory Registry Store
//!
//! `RegistryStore` backed by a `DashMap` of registry rows and a lock-guarded
//! group table. Suitable for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use super::store::RegistryStore;
use crate::error::{Result, SchedulerError};
use crate::models::{
    AddressMode, ExecutorGroup, NewExecutorGroup, RegistryEntry, RegistryKind, RegistryParam,
    UpsertOutcome,
};

type EntryKey = (RegistryKind, String, String);

#[derive(Debug)]
pub struct InMemoryRegistryStore {
    entries: DashMap<EntryKey, RegistryEntry>,
    groups: RwLock<BTreeMap<i64, ExecutorGroup>>,
    next_entry_id: AtomicI64,
    next_group_id: AtomicI64,
    available: AtomicBool,
}

impl Default for InMemoryRegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            groups: RwLock::new(BTreeMap::new()),
            next_entry_id: AtomicI64::new(1),
            next_group_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage; every call fails with `StoreUnavailable` while unset
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of registry rows currently stored
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Look up a single row regardless of liveness
    pub fn entry(&self, kind: RegistryKind, key: &str, value: &str) -> Option<RegistryEntry> {
        self.entries
            .get(&(kind, key.to_string(), value.to_string()))
            .map(|e| e.value().clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SchedulerError::store_unavailable("in-memory registry store is offline"))
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn upsert(&self, param: &RegistryParam, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        self.check_available()?;
        let key = (param.kind, param.key.clone(), param.value.clone());
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.last_seen_at = now;
                if param.load.is_some() {
                    entry.load = param.load;
                }
                Ok(UpsertOutcome::Updated)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RegistryEntry {
                    id: self.next_entry_id.fetch_add(1, Ordering::Relaxed),
                    kind: param.kind,
                    key: param.key.clone(),
                    value: param.value.clone(),
                    last_seen_at: now,
                    load: param.load,
                });
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn remove(&self, kind: RegistryKind, key: &str, value: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .entries
            .remove(&(kind, key.to_string(), value.to_string()))
            .is_some())
    }

    async fn delete_dead_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        self.check_available()?;
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.is_alive_at(cutoff) {
                true
            } else {
                removed.push(entry.id);
                false
            }
        });
        removed.sort_unstable();
        Ok(removed)
    }

    async fn list_alive_since(
        &self,
        kind: RegistryKind,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RegistryEntry>> {
        self.check_available()?;
        let mut alive: Vec<RegistryEntry> = self
            .entries
            .iter()
            .filter(|e| e.kind == kind && e.is_alive_at(cutoff))
            .map(|e| e.value().clone())
            .collect();
        alive.sort_by_key(|e| e.id);
        Ok(alive)
    }

    async fn create_group(
        &self,
        group: NewExecutorGroup,
        now: DateTime<Utc>,
    ) -> Result<ExecutorGroup> {
        self.check_available()?;
        let mut groups = self.groups.write();
        if groups.values().any(|g| g.app_name == group.app_name) {
            return Err(SchedulerError::InvalidState(format!(
                "executor group for app '{}' already exists",
                group.app_name
            )));
        }
        let id = self.next_group_id.fetch_add(1, Ordering::Relaxed);
        let mut created = ExecutorGroup {
            id,
            app_name: group.app_name,
            title: group.title,
            address_mode: group.address_mode,
            address_list: Vec::new(),
            updated_at: now,
        };
        created.set_addresses(group.address_list, now);
        groups.insert(id, created.clone());
        Ok(created)
    }

    async fn update_group(&self, group: &ExecutorGroup) -> Result<()> {
        self.check_available()?;
        let mut groups = self.groups.write();
        match groups.get_mut(&group.id) {
            Some(existing) => {
                *existing = group.clone();
                Ok(())
            }
            None => Err(SchedulerError::NotFound(format!("executor group {}", group.id))),
        }
    }

    async fn delete_group(&self, id: i64) -> Result<bool> {
        self.check_available()?;
        Ok(self.groups.write().remove(&id).is_some())
    }

    async fn load_group_by_id(&self, id: i64) -> Result<Option<ExecutorGroup>> {
        self.check_available()?;
        Ok(self.groups.read().get(&id).cloned())
    }

    async fn load_group_by_app_name(&self, app_name: &str) -> Result<Option<ExecutorGroup>> {
        self.check_available()?;
        Ok(self
            .groups
            .read()
            .values()
            .find(|g| g.app_name == app_name)
            .cloned())
    }

    async fn list_groups_by_mode(&self, mode: AddressMode) -> Result<Vec<ExecutorGroup>> {
        self.check_available()?;
        Ok(self
            .groups
            .read()
            .values()
            .filter(|g| g.address_mode == mode)
            .cloned()
            .collect())
    }
}
