//! Periodic Sweep Task
//!
//! Runs a blocking sweep (purge or rebalance) on a fixed interval until the
//! shutdown signal fires.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Spawns a task calling `sweep` every `interval` on the blocking pool.
///
/// Sweep errors are logged and the task carries on with the next tick. The
/// shutdown signal is only observed between sweeps, so a sweep in progress
/// always completes before the task ends.
pub(crate) fn spawn_sweep_task<F>(
    name: &'static str,
    context: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> Result<usize> + Send + Sync + Clone + 'static,
{
    tokio::spawn(async move {
        info!(
            task = name,
            context = %context,
            "Starting {} task with interval of {:?}", name, interval
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let run = sweep.clone();
            match tokio::task::spawn_blocking(run).await {
                Ok(Ok(0)) => debug!(task = name, context = %context, "nothing to do"),
                Ok(Ok(count)) => info!(task = name, context = %context, count, "sweep finished"),
                Ok(Err(e)) => warn!(task = name, context = %context, error = %e, "sweep failed"),
                Err(e) => warn!(task = name, context = %context, error = %e, "sweep panicked"),
            }
        }

        debug!(task = name, context = %context, "task stopped");
    })
}
