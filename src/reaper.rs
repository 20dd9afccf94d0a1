use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};

/// Background task that prunes expired slots from coach catalogs and moves
/// verified bookings whose window has elapsed into history. Queries already
/// filter lazily; this sweep keeps the physical state small.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();

        for id in engine.collect_completable(now) {
            match engine.complete_booking(id, now).await {
                Ok(Some(_)) => {
                    metrics::counter!(crate::observability::BOOKINGS_SWEPT_TOTAL).increment(1);
                    info!("completed elapsed booking {id}");
                }
                // Already completed or cancelled in the meantime
                Ok(None) => {}
                Err(e) => tracing::debug!("sweep skip {id}: {e}"),
            }
        }

        for (coach_id, slot) in engine.collect_expired_slots(now) {
            match engine
                .remove_slot(coach_id, slot.date, slot.time.clone(), slot.class_type.clone())
                .await
            {
                Ok(()) => info!("pruned expired slot {} {} of coach {coach_id}", slot.date, slot.time),
                Err(EngineError::UnknownSlot { .. }) | Err(EngineError::NotFound(_)) => {}
                Err(e) => tracing::debug!("prune skip: {e}"),
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
