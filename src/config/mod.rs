//! # Scheduler Configuration
//!
//! Typed configuration consumed (not owned) by the scheduling core: sweep period and
//! liveness cutoff, registration pool bounds, and dispatch defaults.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobmesh_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let beat = manager.config().registry.beat_interval();
//! # let _ = beat;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BEAT_INTERVAL, DEFAULT_DEAD_TIMEOUT, DEFAULT_MAX_WORKFLOW_NODES,
    DEFAULT_REGISTRATION_QUEUE_CAPACITY, DEFAULT_REGISTRATION_WORKERS, MIN_BEATS_PER_DEAD_TIMEOUT,
};
use crate::models::{BlockStrategy, RouteStrategy};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Liveness sweep settings
    pub registry: RegistryConfig,

    /// Registration gateway worker pool
    pub registration_pool: RegistrationPoolConfig,

    /// Trigger dispatch defaults
    pub dispatch: DispatchConfig,

    /// Workflow graph limits
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub beat_interval_seconds: u64,
    pub dead_timeout_seconds: u64,
}

impl RegistryConfig {
    pub fn beat_interval(&self) -> Duration {
        Duration::from_secs(self.beat_interval_seconds)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_secs(self.dead_timeout_seconds)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            beat_interval_seconds: DEFAULT_BEAT_INTERVAL.as_secs(),
            dead_timeout_seconds: DEFAULT_DEAD_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistrationPoolConfig {
    /// Number of worker tasks draining the registration queue
    pub workers: usize,
    /// Pending mutations accepted before callers run them inline
    pub queue_capacity: usize,
}

impl Default for RegistrationPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_REGISTRATION_WORKERS,
            queue_capacity: DEFAULT_REGISTRATION_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_route_strategy: String,
    pub default_block_strategy: String,
    /// Per-trigger timeout handed to the transport, 0 disables it
    pub default_timeout_seconds: u64,
    /// Upper bound on how long a serial trigger waits for the previous run
    pub serial_wait_timeout_seconds: u64,
}

impl DispatchConfig {
    pub fn serial_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.serial_wait_timeout_seconds)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_seconds > 0).then(|| Duration::from_secs(self.default_timeout_seconds))
    }

    /// Block strategy for jobs that do not set one; unparseable values fall back to serial
    pub fn block_strategy(&self) -> BlockStrategy {
        self.default_block_strategy
            .parse()
            .unwrap_or(BlockStrategy::SerialExecution)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_route_strategy: RouteStrategy::Round.as_str().to_string(),
            default_block_strategy: BlockStrategy::SerialExecution.as_str().to_string(),
            default_timeout_seconds: 0,
            serial_wait_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_nodes: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_WORKFLOW_NODES,
        }
    }
}

impl SchedulerConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        let registry = &self.registry;
        if registry.beat_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "registry.beat_interval_seconds",
                registry.beat_interval_seconds,
                "must be greater than zero",
            ));
        }
        if registry.dead_timeout_seconds < registry.beat_interval_seconds * MIN_BEATS_PER_DEAD_TIMEOUT
        {
            return Err(ConfigurationError::ConstraintViolation(format!(
                "registry.dead_timeout_seconds ({}) must be at least {} x beat_interval_seconds ({})",
                registry.dead_timeout_seconds,
                MIN_BEATS_PER_DEAD_TIMEOUT,
                registry.beat_interval_seconds
            )));
        }

        if self.registration_pool.workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "registration_pool.workers",
                0,
                "at least one worker is required",
            ));
        }
        if self.registration_pool.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "registration_pool.queue_capacity",
                0,
                "queue capacity must be greater than zero",
            ));
        }

        self.dispatch
            .default_route_strategy
            .parse::<RouteStrategy>()
            .map_err(|e| {
                ConfigurationError::invalid_value(
                    "dispatch.default_route_strategy",
                    &self.dispatch.default_route_strategy,
                    e,
                )
            })?;
        self.dispatch
            .default_block_strategy
            .parse::<BlockStrategy>()
            .map_err(|e| {
                ConfigurationError::invalid_value(
                    "dispatch.default_block_strategy",
                    &self.dispatch.default_block_strategy,
                    e,
                )
            })?;

        if self.workflow.max_nodes == 0 {
            return Err(ConfigurationError::invalid_value(
                "workflow.max_nodes",
                0,
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.beat_interval(), Duration::from_secs(30));
        assert_eq!(config.registry.dead_timeout(), Duration::from_secs(90));
        assert_eq!(config.dispatch.default_timeout(), None);
    }

    #[test]
    fn test_dead_timeout_must_cover_three_beats() {
        let mut config = SchedulerConfig::default();
        config.registry.dead_timeout_seconds = 60;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::ConstraintViolation(_)));
    }

    #[test]
    fn test_unknown_strategy_names_rejected() {
        let mut config = SchedulerConfig::default();
        config.dispatch.default_route_strategy = "SMALLEST_PING".to_string();
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.dispatch.default_block_strategy = "QUEUE_FOREVER".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_block_strategy_parsed() {
        let mut config = SchedulerConfig::default();
        assert_eq!(config.dispatch.block_strategy(), BlockStrategy::SerialExecution);

        config.dispatch.default_block_strategy = "discard_later".to_string();
        assert_eq!(config.dispatch.block_strategy(), BlockStrategy::DiscardLater);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = SchedulerConfig::default();
        config.registration_pool.workers = 0;
        assert!(config.validate().is_err());
    }
}
