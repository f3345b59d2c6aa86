//! # Structured Logging Module
//!
//! Tracing subscriber setup plus a few structured log helpers shared by the executor
//! and the connectors so operation records look the same wherever they are emitted.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging; later calls are no-ops
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let result = if config.json {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_filter(filter),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_ansi(true)
                        .with_filter(filter),
                )
                .try_init()
        };

        // An embedding application may already own the global subscriber
        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = std::process::id(),
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for executable transitions
pub fn log_executable_operation(
    operation: &str,
    executable_id: &str,
    kind: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        executable_id = %executable_id,
        kind = %kind,
        status = %status,
        details = details,
        "📋 EXECUTABLE_OPERATION"
    );
}

/// Log structured data for device commands
pub fn log_device_command(device_id: &str, action: &str, status: &str, duration_ms: u64) {
    tracing::debug!(
        device_id = %device_id,
        action = %action,
        status = %status,
        duration_ms = duration_ms,
        "🔌 DEVICE_COMMAND"
    );
}
