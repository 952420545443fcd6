//! Periodic sweep driver.
//!
//! Runs `Engine::sweep` on its own cadence, independent of event arrival:
//! due TIME transitions, TIME rules, and the overlay expiry sweep. Each
//! per-user tick takes the same per-user lock as live events, so a sweep
//! never interleaves with an in-flight event for the same user.
//!
//! Shutdown is a watch channel: flip the value (or drop the sender) and the
//! loop exits after the tick in progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Engine;

/// Spawn the sweep loop. Returns the task handle; await it after signalling
/// shutdown for a clean stop.
pub fn spawn(
    engine: Arc<Engine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip it so a sweep
        // doesn't race engine startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match engine.sweep().await {
                        Ok(report) => debug!(
                            users = report.users,
                            transitions = report.transitions,
                            expired = report.expired_overlays,
                            rules = report.rules_fired,
                            failures = report.failures,
                            "sweep complete"
                        ),
                        Err(e) => warn!(error = %e, "sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        debug!("scheduler stopping");
                        break;
                    }
                }
            }
        }
    })
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
