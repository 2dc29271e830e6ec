//! Periodic purge of expired entries.
//!
//! Lazy expiry only reclaims entries that are read again; write-once traffic would
//! otherwise stay resident until overwritten. Each cache gets its own sweeper task.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info};

const METRIC_SWEEP_EVICTED: &str = "menu_cache_sweep_evicted_total";

/// Something whose expired entries can be purged in one pass.
pub trait Sweep: Send + Sync + 'static {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Purge expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
}

/// Handle to a running sweeper task.
///
/// Call [`SweeperHandle::shutdown`] for a clean stop. Dropping the handle aborts the
/// task instead, so a forgotten handle never outlives its owner.
pub struct SweeperHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Spawn a task that calls `target.sweep()` every `every`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S: Sweep>(target: Arc<S>, every: Duration) -> Self {
        let name = target.name();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                cache = name,
                interval_ms = every.as_millis() as u64,
                "cache sweeper started"
            );
            let mut ticker = interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = target.sweep();
                        counter!(METRIC_SWEEP_EVICTED, "cache" => name).increment(removed as u64);
                        debug!(cache = name, removed, "cache sweep complete");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(cache = name, "cache sweeper stopped");
        });

        Self {
            name,
            shutdown,
            task: Some(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
