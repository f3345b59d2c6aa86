//! Broker Executor Binary
//!
//! Loads the broker configuration, connects every configured device and runs the
//! executor daemon until Ctrl-C. Usage: `broker-executor [config-file]`.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use conference_broker::config::ConfigLoader;
use conference_broker::connector::{
    build_connector, connection_parameters, ConnectorRegistry, LoggingController,
};
use conference_broker::execution::{
    DeviceId, Executor, ExecutorConfig, ExecutorDaemon, MemoryExecutableStore,
};
use conference_broker::logging::init_structured_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = ConfigLoader::new()
        .with_path(path)
        .load()
        .context("loading broker configuration")?;
    init_structured_logging(&config.logging);

    info!(connectors = config.connectors.len(), "Starting broker executor");

    let controller = Arc::new(LoggingController);
    let registry = Arc::new(ConnectorRegistry::new(config.executor.command_timeout));
    for connector_config in &config.connectors {
        let connector = build_connector(connector_config, controller.clone())
            .with_context(|| format!("building connector {}", connector_config.device_id))?;
        let (address, credentials) = connection_parameters(connector_config)?;

        // An unreachable device stays registered; its commands fail until it connects
        if let Err(err) = connector.connect(&address, &credentials).await {
            warn!(device_id = %connector_config.device_id, error = %err, "⚠️ Device not connected");
        }
        registry.register(DeviceId::new(connector_config.device_id.clone()), connector);
    }

    let store = Arc::new(MemoryExecutableStore::new());
    let executor = Arc::new(Executor::new(
        store,
        Arc::clone(&registry),
        ExecutorConfig::from(&config.executor),
    ));
    let daemon = ExecutorDaemon::new(executor, config.executor.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon_task = tokio::spawn(async move { daemon.run(shutdown_rx).await });

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    if let Err(err) = daemon_task.await {
        error!(error = %err, "Executor daemon task failed");
    }

    registry.disconnect_all().await;
    info!("Broker executor stopped");
    Ok(())
}
