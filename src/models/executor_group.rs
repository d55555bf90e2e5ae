use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{truncate_chars, GROUP_TITLE_MAX_CHARS};

/// How a group's address list is maintained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    /// Recomputed by the liveness monitor from alive registry rows
    Auto,
    /// Entered by an operator, never touched by the monitor
    Manual,
}

impl AddressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressMode::Auto => "auto",
            AddressMode::Manual => "manual",
        }
    }
}

impl std::fmt::Display for AddressMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named set of executor addresses that jobs are routed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorGroup {
    pub id: i64,
    pub app_name: String,
    pub title: String,
    pub address_mode: AddressMode,
    /// Sorted, deduplicated addresses
    pub address_list: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutorGroup {
    pub fn has_live_members(&self) -> bool {
        !self.address_list.is_empty()
    }

    /// Replace the address list, keeping it sorted and free of duplicates
    pub fn set_addresses<I>(&mut self, addresses: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = String>,
    {
        let mut list: Vec<String> = addresses.into_iter().collect();
        list.sort();
        list.dedup();
        self.address_list = list;
        self.updated_at = now;
    }
}

/// New ExecutorGroup for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecutorGroup {
    pub app_name: String,
    pub title: String,
    pub address_mode: AddressMode,
    pub address_list: Vec<String>,
}

impl NewExecutorGroup {
    /// Group provisioned on the first registration of an unknown app name
    pub fn auto_provisioned(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            title: truncate_chars(app_name, GROUP_TITLE_MAX_CHARS),
            address_mode: AddressMode::Auto,
            address_list: Vec::new(),
        }
    }

    pub fn manual(app_name: &str, title: &str, addresses: Vec<String>) -> Self {
        Self {
            app_name: app_name.to_string(),
            title: truncate_chars(title, GROUP_TITLE_MAX_CHARS),
            address_mode: AddressMode::Manual,
            address_list: addresses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_provisioned_group_truncates_title() {
        let group = NewExecutorGroup::auto_provisioned("nightly-warehouse-loader");
        assert_eq!(group.title, "nightly-ware");
        assert_eq!(group.app_name, "nightly-warehouse-loader");
        assert_eq!(group.address_mode, AddressMode::Auto);
        assert!(group.address_list.is_empty());
    }

    #[test]
    fn test_set_addresses_sorts_and_dedupes() {
        let mut group = ExecutorGroup {
            id: 1,
            app_name: "etl".into(),
            title: "etl".into(),
            address_mode: AddressMode::Auto,
            address_list: vec![],
            updated_at: Utc::now(),
        };
        group.set_addresses(
            vec!["b:1".to_string(), "a:1".to_string(), "b:1".to_string()],
            Utc::now(),
        );
        assert_eq!(group.address_list, vec!["a:1", "b:1"]);
    }
}
