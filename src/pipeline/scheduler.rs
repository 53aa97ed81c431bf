//! Recurring fetch: re-run the batch on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::orchestrator::Orchestrator;
use crate::worker::WorkerPool;

/// Spawn the recurring fetch timer.
///
/// The first run happens one full `interval` after start. A tick that finds
/// a batch in flight is skipped, never queued. Returns a `JoinHandle` and a
/// shutdown flag; set the flag to stop at the next tick.
pub fn spawn_recurring_fetch(
    orchestrator: Arc<Orchestrator>,
    pool: Arc<WorkerPool>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Recurring fetch started");

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        tick.tick().await;

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Recurring fetch shutting down");
                return;
            }

            fire(&orchestrator, &pool);
        }
    });

    (handle, shutdown_flag)
}

fn fire(orchestrator: &Arc<Orchestrator>, pool: &WorkerPool) {
    let permit = match orchestrator.begin() {
        Ok(permit) => permit,
        Err(_) => {
            info!("Batch already in progress, skipping scheduled fetch");
            return;
        }
    };

    let orch = Arc::clone(orchestrator);
    let submitted = pool.submit("scheduled-fetch", async move {
        match orch.run(permit, None).await {
            Ok(report) => info!(
                processed = report.processed,
                total = report.total,
                "Scheduled fetch complete"
            ),
            Err(e) => warn!(error = %e, "Scheduled fetch failed"),
        }
    });
    // On rejection the future is dropped, and the permit with it.
    if let Err(e) = submitted {
        warn!(error = %e, "Scheduled fetch not started");
    }
}
