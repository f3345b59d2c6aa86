//! # Connector Background Tasks
//!
//! Long-lived reconciliation loops bound to a connector's connection lifetime.
//!
//! Loops are started at most once per successful connect, wake on their period or on the
//! shutdown signal, and hold only a weak reference to the connector state they work on so
//! a dropped connector ends its loops. [`BackgroundTasks::shutdown`] signals every loop
//! and awaits its termination.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct BackgroundTasks {
    device_id: String,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl BackgroundTasks {
    pub fn new(device_id: impl Into<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            device_id: device_id.into(),
            started: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Claim the right to start loops; `false` if they are already running
    pub fn try_start(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(device_id = %self.device_id, "Background tasks already running");
            return false;
        }
        self.shutdown_tx.send_replace(false);
        true
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Receiver that flips to `true` when shutdown is requested
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a loop running `pass` every `period` while `owner` is alive
    pub fn spawn_periodic<T, F, Fut>(&self, name: &'static str, period: Duration, owner: Weak<T>, pass: F)
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let device_id = self.device_id.clone();

        let handle = tokio::spawn(async move {
            info!(device_id = %device_id, task = name, period_ms = period.as_millis() as u64, "🔄 Background loop started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(device_id = %device_id, task = name, "Shutdown signal received");
                            break;
                        }
                        continue;
                    }
                }

                let Some(state) = owner.upgrade() else {
                    warn!(device_id = %device_id, task = name, "Connector dropped, ending background loop");
                    break;
                };
                pass(state).await;
            }
            info!(device_id = %device_id, task = name, "🛑 Background loop ended");
        });

        self.handles.lock().push((name, handle));
    }

    /// Signal every loop and wait until all of them have ended
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for (name, handle) in handles {
            if let Err(error) = handle.await {
                warn!(device_id = %self.device_id, task = name, error = %error, "Background loop terminated abnormally");
            }
        }
        self.started.store(false, Ordering::Release);
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        passes: AtomicUsize,
    }

    #[tokio::test]
    async fn test_start_once_and_shutdown() {
        let tasks = BackgroundTasks::new("acr-1");
        let counter = Arc::new(Counter::default());

        assert!(tasks.try_start());
        assert!(!tasks.try_start());
        tasks.spawn_periodic("count", Duration::from_millis(5), Arc::downgrade(&counter), |c: Arc<Counter>| async move {
            c.passes.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tasks.shutdown().await;
        let passes = counter.passes.load(Ordering::SeqCst);
        assert!(passes >= 1);
        assert!(!tasks.is_running());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.passes.load(Ordering::SeqCst), passes, "no passes after shutdown");

        assert!(tasks.try_start(), "loops may start again after a reconnect");
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_period() {
        let tasks = BackgroundTasks::new("tcs-1");
        let counter = Arc::new(Counter::default());
        assert!(tasks.try_start());
        tasks.spawn_periodic("slow", Duration::from_secs(3600), Arc::downgrade(&counter), |c: Arc<Counter>| async move {
            c.passes.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(1), tasks.shutdown())
            .await
            .expect("shutdown is signalled, not polled");
        assert_eq!(counter.passes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_loop_ends_when_owner_is_dropped() {
        let tasks = BackgroundTasks::new("acr-2");
        let counter = Arc::new(Counter::default());
        assert!(tasks.try_start());
        tasks.spawn_periodic("owned", Duration::from_millis(5), Arc::downgrade(&counter), |c: Arc<Counter>| async move {
            c.passes.fetch_add(1, Ordering::SeqCst);
        });
        drop(counter);

        tokio::time::timeout(Duration::from_secs(1), tasks.shutdown())
            .await
            .expect("loop ended on its own");
    }
}
