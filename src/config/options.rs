//! Opaque connector options
//!
//! Every connector receives a flat key-value map from its configuration entry and reads
//! the keys it understands at `connect()` time. Values are strings; typed getters parse
//! durations (`500ms`, `30s`, `5m`, `2h`, `1d`, bare seconds), numbers and patterns.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::{ConfigResult, ConfigurationError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorOptions(BTreeMap<String, String>);

impl ConnectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mostly used by tests and embedding code
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or(default).to_string()
    }

    pub fn required_string(&self, key: &str) -> ConfigResult<&str> {
        self.string(key)
            .ok_or_else(|| ConfigurationError::missing_key(key))
    }

    pub fn duration(&self, key: &str, default: Duration) -> ConfigResult<Duration> {
        match self.string(key) {
            Some(value) => parse_duration(value)
                .map_err(|reason| ConfigurationError::invalid_value(key, value, reason)),
            None => Ok(default),
        }
    }

    pub fn u32_or(&self, key: &str, default: u32) -> ConfigResult<u32> {
        match self.string(key) {
            Some(value) => value.trim().parse::<u32>().map_err(|e| {
                ConfigurationError::invalid_value(key, value, e.to_string())
            }),
            None => Ok(default),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> ConfigResult<bool> {
        match self.string(key) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                _ => Err(ConfigurationError::invalid_value(
                    key,
                    value,
                    "expected a boolean",
                )),
            },
            None => Ok(default),
        }
    }

    pub fn pattern(&self, key: &str) -> ConfigResult<Option<Regex>> {
        self.string(key)
            .map(|value| {
                Regex::new(value)
                    .map_err(|e| ConfigurationError::invalid_value(key, value, e.to_string()))
            })
            .transpose()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for ConnectorOptions {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parse a humanized duration such as `250ms`, `30s`, `5m`, `2h` or `1d`.
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let amount: u64 = number
        .parse()
        .map_err(|_| format!("'{value}' does not start with a number"))?;

    let seconds_per_unit: u64 = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(amount)),
        "" | "s" | "sec" | "secs" => 1,
        "m" | "min" | "mins" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    amount
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("'{value}' is out of range"))
}

/// Render a duration in the same format [`parse_duration`] accepts
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        format!("{millis}ms")
    } else {
        let secs = duration.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

/// Serde adapter for humanized durations in configuration files
pub mod humanized {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = String::deserialize(deserializer)?;
        super::parse_duration(&value).map_err(D::Error::custom)
    }
}
