use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the platform a registry row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryKind {
    Executor,
    Admin,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Executor => "EXECUTOR",
            RegistryKind::Admin => "ADMIN",
        }
    }
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXECUTOR" => Ok(Self::Executor),
            "ADMIN" => Ok(Self::Admin),
            other => Err(format!("Invalid registry kind: {other}")),
        }
    }
}

/// Resource usage reported alongside a heartbeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f64,
    /// Memory usage percentage (0-100)
    pub memory_usage: f64,
    /// Jobs currently executing on the worker
    pub running_tasks: u32,
}

/// Heartbeat-refreshed row asserting an executor or admin node is alive
///
/// Unique on `(kind, key, value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: i64,
    pub kind: RegistryKind,
    /// Application name the address belongs to
    pub key: String,
    /// Executor address
    pub value: String,
    pub last_seen_at: DateTime<Utc>,
    pub load: Option<LoadSnapshot>,
}

impl RegistryEntry {
    pub fn is_alive_at(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen_at >= cutoff
    }
}

/// Registration payload before it reaches the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryParam {
    pub kind: RegistryKind,
    pub key: String,
    pub value: String,
    pub load: Option<LoadSnapshot>,
}

impl RegistryParam {
    pub fn new(kind: RegistryKind, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: value.into(),
            load: None,
        }
    }

    pub fn with_load(mut self, load: LoadSnapshot) -> Self {
        self.load = Some(load);
        self
    }
}

impl std::fmt::Display for RegistryParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.key, self.value)
    }
}

/// Result of an upsert against the registry store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}
