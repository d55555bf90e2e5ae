//! Error types for the scheduling core.

use thiserror::Error;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No available executor: {0}")]
    NoAvailableExecutor(String),
    #[error("Dispatch to {address} failed: {message}")]
    DispatchError { address: String, message: String },
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SchedulerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn dispatch(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DispatchError {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Errors the caller may reasonably retry later without changing its input
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Timeout(_) | Self::NoAvailableExecutor(_)
        )
    }
}

impl From<ConfigurationError> for SchedulerError {
    fn from(error: ConfigurationError) -> Self {
        SchedulerError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(error: serde_json::Error) -> Self {
        SchedulerError::InvalidArgument(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
