//! Background Tasks Module
//!
//! Owns every task spawned on behalf of cache engines and stops them
//! together.
//!
//! # Tasks
//! - Purge: removes expired items from an engine at its configured interval
//! - Rebalance: moves hot items of a tiered engine to its cold tier
//! - Replication: peer listeners and per-peer senders

mod sweep;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{SharedEngine, TieredCache};

use sweep::spawn_sweep_task;

// == Background Tasks ==
/// Shutdown signal plus the handles of every task listening to it.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Receiver that changes once [`BackgroundTasks::shutdown`] is called.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Adds a task that must be joined on shutdown.
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    // == Purge Timer ==
    /// Purges `engine` every `interval`. A zero interval disables the timer.
    pub fn spawn_purge_task(&mut self, context: &str, engine: SharedEngine, interval: Duration) {
        if interval.is_zero() {
            debug!(context, "purge timer disabled");
            return;
        }
        let handle = spawn_sweep_task(
            "purge",
            context.to_string(),
            interval,
            self.subscribe(),
            move || engine.purge(),
        );
        self.track(handle);
    }

    // == Rebalance Timer ==
    /// Rebalances `tiered` at its configured rebalance interval.
    pub fn spawn_rebalance_task(&mut self, context: &str, tiered: Arc<TieredCache>) {
        let interval = tiered.settings().rebalance_interval;
        if interval.is_zero() {
            debug!(context, "rebalance timer disabled");
            return;
        }
        let handle = spawn_sweep_task(
            "rebalance",
            context.to_string(),
            interval,
            self.subscribe(),
            move || tiered.rebalance(),
        );
        self.track(handle);
    }

    // == Shutdown ==
    /// Signals every task to stop and waits for all of them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let count = self.handles.len();

        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!(count, "background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
