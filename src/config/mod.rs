//! # Broker Configuration
//!
//! Layered configuration for the execution engine and the connectors it drives.
//!
//! ## Sources (later sources override earlier ones)
//!
//! 1. Built-in defaults ([`BrokerConfig::default`])
//! 2. A configuration file (`config/broker.toml` / `.yaml`, or an explicit path)
//! 3. Environment variables prefixed with `BROKER__` (`BROKER__EXECUTOR__POLL_INTERVAL=10s`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conference_broker::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! println!("polling every {:?}", config.executor.poll_interval);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod options;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;
pub use options::{parse_duration, ConnectorOptions};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Reconciliation driver settings
    pub executor: ExecutorSettings,

    /// Tracing subscriber settings
    pub logging: LoggingConfig,

    /// Managed devices
    pub connectors: Vec<ConnectorConfig>,
}

impl BrokerConfig {
    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.executor.poll_interval.is_zero() {
            return Err(ConfigurationError::validation(
                "executor.poll_interval must be greater than zero",
            ));
        }
        if self.executor.command_timeout.is_zero() {
            return Err(ConfigurationError::validation(
                "executor.command_timeout must be greater than zero",
            ));
        }

        let mut seen = HashSet::new();
        for connector in &self.connectors {
            if connector.device_id.trim().is_empty() {
                return Err(ConfigurationError::validation(
                    "connector device_id must not be empty",
                ));
            }
            if !seen.insert(connector.device_id.as_str()) {
                return Err(ConfigurationError::validation(format!(
                    "duplicate connector device_id '{}'",
                    connector.device_id
                )));
            }
            if url::Url::parse(&connector.address).is_err() {
                return Err(ConfigurationError::invalid_value(
                    format!("connectors.{}.address", connector.device_id),
                    connector.address.clone(),
                    "expected an absolute URL",
                ));
            }
        }
        Ok(())
    }
}

/// Reconciliation driver settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// How long before its slot begins an executable is started
    #[serde(with = "options::humanized")]
    pub start_margin: Duration,

    /// How long after its slot ends an executable is stopped
    #[serde(with = "options::humanized")]
    pub stop_margin: Duration,

    /// Interval of the daemon loop
    #[serde(with = "options::humanized")]
    pub poll_interval: Duration,

    /// Upper bound for a single connector command
    #[serde(with = "options::humanized")]
    pub command_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            start_margin: Duration::ZERO,
            stop_margin: Duration::ZERO,
            poll_interval: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,conference_broker=debug".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    AdobeConnect,
    CiscoTcs,
}

/// One managed device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    pub device_id: String,
    pub kind: ConnectorKind,
    /// Base URL of the device API
    pub address: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub options: ConnectorOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(device_id: &str) -> ConnectorConfig {
        ConnectorConfig {
            device_id: device_id.to_string(),
            kind: ConnectorKind::AdobeConnect,
            address: "https://connect.example.org".to_string(),
            username: "broker".to_string(),
            password: "secret".to_string(),
            options: ConnectorOptions::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.start_margin, Duration::ZERO);
        assert_eq!(config.executor.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_duplicate_devices_are_rejected() {
        let config = BrokerConfig {
            connectors: vec![connector("acr"), connector("acr")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::Validation(message)) if message.contains("duplicate")
        ));
    }

    #[test]
    fn test_relative_address_is_rejected() {
        let mut entry = connector("tcs");
        entry.address = "tcs.example.org".to_string();
        let config = BrokerConfig {
            connectors: vec![entry],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_settings_serialize_humanized_durations() {
        let json = serde_json::to_value(ExecutorSettings::default()).unwrap();
        assert_eq!(json["poll_interval"], "30s");
        assert_eq!(json["command_timeout"], "1m");
    }
}
