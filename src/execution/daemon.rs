//! Periodic driver running [`Executor::execute`] for the current instant until shut down.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::executor::{ExecutionResult, Executor};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ExecutorDaemon {
    executor: Arc<Executor>,
    interval: Duration,
}

impl ExecutorDaemon {
    pub fn new(executor: Arc<Executor>, interval: Duration) -> Self {
        Self { executor, interval }
    }

    /// One pass for the current instant
    pub async fn tick(&self) -> Result<ExecutionResult> {
        self.executor.execute(Utc::now()).await
    }

    /// Run passes every interval until `shutdown` becomes `true`
    ///
    /// A failed pass (a rejected plan, a store failure) is logged and the loop continues;
    /// the next pass re-reads the store.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "🚀 Executor daemon started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(result) if result.is_empty() => debug!("Executor pass idle"),
                Ok(result) => debug!(
                    started = result.started.len(),
                    stopped = result.stopped.len(),
                    failed = result.failed.len(),
                    "Executor pass finished"
                ),
                Err(error) => error!(error = %error, "❌ Executor pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🛑 Executor daemon stopped");
    }
}
