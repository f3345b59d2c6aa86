//! Configuration Loader
//!
//! Merges built-in defaults, an optional configuration file and `BROKER__`-prefixed
//! environment variables, then validates the result.

use ::config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::ConfigResult;
use super::BrokerConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/broker";
const ENV_PREFIX: &str = "BROKER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    skip_environment: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an explicit file instead of `config/broker.*`; the file must exist
    pub fn with_path(mut self, path: Option<PathBuf>) -> Self {
        self.path = path;
        self
    }

    /// Ignore environment overrides (tests run with a shared process environment)
    pub fn without_environment(mut self) -> Self {
        self.skip_environment = true;
        self
    }

    pub fn load(&self) -> ConfigResult<BrokerConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&BrokerConfig::default())?);

        builder = match &self.path {
            Some(path) => {
                debug!(path = %path.display(), "Loading broker configuration file");
                builder.add_source(File::from(path.as_path()).required(true))
            }
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false)),
        };

        if !self.skip_environment {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR),
            );
        }

        let config: BrokerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            connectors = config.connectors.len(),
            poll_interval_ms = config.executor.poll_interval.as_millis() as u64,
            "⚙️ Broker configuration loaded"
        );
        Ok(config)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
