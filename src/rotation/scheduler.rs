//! Periodic trigger for reassignment cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::{CycleOutcome, Engine};

/// Spawn the periodic reassignment loop.
///
/// The loop stops when `shutdown` is cancelled; a cycle in flight at that
/// moment aborts without committing.
pub fn spawn_reassign_loop(
    engine: Arc<Engine>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(reassign_loop(engine, interval, shutdown))
}

/// Run a cycle on every tick. Outcomes are logged, never propagated.
pub async fn reassign_loop(engine: Arc<Engine>, interval: Duration, shutdown: CancellationToken) {
    tracing::info!(
        "Reassignment scheduler started: running every {}s",
        interval.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the first cycle waits one full period.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Reassignment scheduler stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match engine.run_cycle(&shutdown).await {
            Ok(CycleOutcome::Completed(report)) => {
                tracing::info!(
                    "Scheduled reassignment finished: {} tasks changed ({} assigned, {} waiting, {} completed)",
                    report.changed(),
                    report.assigned,
                    report.waiting,
                    report.completed
                );
            }
            Ok(CycleOutcome::Aborted) => {
                tracing::info!("Scheduled reassignment aborted, will retry next tick");
            }
            Err(e) => {
                tracing::error!("Scheduled reassignment failed: {}", e);
            }
        }
    }
}
