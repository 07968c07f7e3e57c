use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that moves CONFIRMED bookings to COMPLETED once their
/// last slot has ended. Slot times are venue-local, so the sweep compares
/// against the local wall clock.
pub async fn run_completer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        complete_due(&engine, now).await;
    }
}

/// One sweep. Returns how many bookings were completed.
pub async fn complete_due(engine: &Engine, now: chrono::NaiveDateTime) -> usize {
    let mut completed = 0;
    for booking_id in engine.collect_due_completions(now) {
        match engine.complete_booking(booking_id).await {
            Ok(true) => completed += 1,
            Ok(false) => {}
            Err(e) => {
                // A failed append is retried by the next sweep.
                debug!("completer skip {booking_id}: {e}");
            }
        }
    }
    if completed > 0 {
        info!("completed {completed} bookings");
    }
    completed
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
