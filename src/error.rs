//! # Structured Error Handling
//!
//! Crate-level error type. Component errors (plan construction, connector commands,
//! storage, configuration) keep their own enums and convert into [`BrokerError`] at
//! the boundaries where they escape a component.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::connector::{CommandError, ControllerError};
use crate::execution::{DeviceId, ExecutableId, PlanError};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Unknown executable: {0}")]
    UnknownExecutable(ExecutableId),

    #[error("No connector registered for device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl BrokerError {
    /// Whether the error rejected a whole scheduling pass
    pub fn is_fatal_plan_error(&self) -> bool {
        matches!(self, Self::Plan(PlanError::DependencyCycle { .. }))
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_errors_are_fatal() {
        let error: BrokerError = PlanError::DependencyCycle {
            executables: vec![ExecutableId(1), ExecutableId(2)],
        }
        .into();
        assert!(error.is_fatal_plan_error());
        assert!(error.to_string().contains("cycle"));

        let error = BrokerError::UnknownExecutable(ExecutableId(7));
        assert!(!error.is_fatal_plan_error());
        assert_eq!(error.to_string(), "Unknown executable: exe:7");
    }
}
