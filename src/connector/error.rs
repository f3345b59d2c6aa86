//! # Connector Error Types
//!
//! Typed failures of device commands. Device error vocabulary travels as explicit
//! `code`/`sub_code` fields so callers match structurally instead of parsing messages.

use thiserror::Error;

use super::operation::ConnectorOperation;
use crate::config::ConfigurationError;
use crate::storage::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The connector does not implement the operation; never retry
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: ConnectorOperation },

    /// The device rejected the command with its own error vocabulary
    #[error("Command {command} failed with {code}{}: {message}", sub_code.as_ref().map(|s| format!("/{s}")).unwrap_or_default())]
    Failed {
        command: String,
        code: String,
        sub_code: Option<String>,
        message: String,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Response parse error: {message}")]
    Parse { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Device {device} is not connected")]
    NotConnected { device: String },
}

impl CommandError {
    pub fn unsupported(operation: ConnectorOperation) -> Self {
        Self::Unsupported { operation }
    }

    pub fn failed(
        command: impl Into<String>,
        code: impl Into<String>,
        sub_code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Failed {
            command: command.into(),
            code: code.into(),
            sub_code,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn not_connected(device: impl Into<String>) -> Self {
        Self::NotConnected {
            device: device.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Match the device vocabulary; `None` for `sub_code` matches any sub-code
    pub fn has_code(&self, code: &str, sub_code: Option<&str>) -> bool {
        match self {
            Self::Failed {
                code: actual,
                sub_code: actual_sub,
                ..
            } => actual == code && sub_code.map_or(true, |sub| actual_sub.as_deref() == Some(sub)),
            _ => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Failed { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn sub_code(&self) -> Option<&str> {
        match self {
            Self::Failed { sub_code, .. } => sub_code.as_deref(),
            _ => None,
        }
    }

    /// Taxonomy name used in state reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unsupported { .. } => "unsupported",
            Self::Failed { .. } => "failed",
            Self::Protocol { .. } => "protocol",
            Self::Parse { .. } => "parse",
            Self::Io { .. } => "io",
            Self::Storage { .. } => "storage",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Timeout { .. } => "timeout",
            Self::NotConnected { .. } => "not_connected",
        }
    }
}

impl From<reqwest::Error> for CommandError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CommandError::timeout("http", 0)
        } else if err.is_decode() {
            CommandError::parse(err.to_string())
        } else {
            CommandError::io(err.to_string())
        }
    }
}

impl From<quick_xml::Error> for CommandError {
    fn from(err: quick_xml::Error) -> Self {
        CommandError::parse(err.to_string())
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::io(err.to_string())
    }
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        CommandError::storage(err.to_string())
    }
}

impl From<ConfigurationError> for CommandError {
    fn from(err: ConfigurationError) -> Self {
        CommandError::invalid_argument(err.to_string())
    }
}

/// Failures of the controller action channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Controller unavailable: {message}")]
    Unavailable { message: String },

    #[error("Controller rejected {action}: {message}")]
    Rejected { action: String, message: String },

    #[error("Unexpected controller reply to {action}")]
    UnexpectedReply { action: String },
}

impl ControllerError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn unexpected_reply(action: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            action: action.into(),
        }
    }
}

impl From<ControllerError> for CommandError {
    fn from(err: ControllerError) -> Self {
        CommandError::protocol(err.to_string())
    }
}

pub type CommandResult<T> = Result<T, CommandError>;
