//! Periodic refresh cycles
//!
//! Spawns a task that runs one orchestrator cycle per interval until the
//! shutdown channel flips to `true`. Cycles never overlap: a cycle that
//! overruns the interval delays the next tick instead of bursting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::orchestrator::{CycleResult, RefreshOrchestrator};

/// Spawn the periodic refresh loop.
///
/// The first cycle runs one full `interval` after spawning. `on_cycle` is
/// called with every cycle that launched at least one task.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_refresh_loop<F>(
    orchestrator: Arc<RefreshOrchestrator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    on_cycle: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(CycleResult) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick; startup already primed the cache
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match orchestrator.refresh().await {
                        Some(result) => on_cycle(result),
                        None => debug!("refresh cycle skipped, no routers known"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("stopping periodic mount table refresh");
                        break;
                    }
                }
            }
        }
    })
}
