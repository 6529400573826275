//! Parallel spatial-index backfill
//!
//! Recomputing cell ids over an existing dataset is the one horizontally
//! parallel job in the system. N workers repeatedly claim a bounded batch
//! of not-yet-indexed rows through the store's claim-and-skip ledger,
//! compute ids outside the lock, and write them back in one batch. Workers
//! make independent progress: the claim step is the only coordination, and
//! a row claimed by one worker is invisible to the others.
//!
//! Cancellation is cooperative: the stop flag and the optional row cap are
//! re-checked after every batch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{info, warn};

use crate::core_types::geo::GeoPoint;
use crate::spatial::{cell_id, IndexError, MAX_RESOLUTION};
use crate::store::Store;
use crate::summary::RunSummary;

/// Tuning for one backfill run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    pub resolution: u8,
    pub workers: usize,
    pub batch_size: usize,
    /// Optional global cap on rows processed this run
    pub max_rows: Option<u64>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        BackfillConfig {
            resolution: 12,
            workers: 4,
            batch_size: 500,
            max_rows: None,
        }
    }
}

/// Outcome counters for one backfill run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub events_indexed: u64,
    pub detections_indexed: u64,
    pub skipped: u64,
    pub batches: u64,
    pub elapsed_ms: u64,
}

impl BackfillSummary {
    /// View as the uniform per-run summary every batch job reports
    pub fn as_run_summary(&self) -> RunSummary {
        let indexed = self.events_indexed + self.detections_indexed;
        RunSummary {
            job: "backfill".to_string(),
            processed: indexed + self.skipped,
            updated: indexed,
            skipped: self.skipped,
            elapsed_ms: self.elapsed_ms,
            dry_run: false,
        }
    }
}

/// Run a parallel backfill over all unindexed events and detections.
///
/// # Errors
/// Fails up front on an unusable resolution; per-row coordinate problems
/// are logged and skipped, never fatal.
pub fn backfill_cells(
    store: &mut Store,
    config: &BackfillConfig,
    stop: &AtomicBool,
) -> Result<BackfillSummary, IndexError> {
    if config.resolution == 0 || config.resolution > MAX_RESOLUTION {
        return Err(IndexError::InvalidResolution(config.resolution));
    }
    let started = Instant::now();
    let workers = config.workers.max(1);
    let batch_size = config.batch_size.max(1);

    let shared = Mutex::new(store);
    let rows_processed = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);
    let batches = AtomicU64::new(0);
    let events_indexed = AtomicU64::new(0);
    let detections_indexed = AtomicU64::new(0);

    rayon::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                worker_loop(
                    &shared,
                    config.resolution,
                    batch_size,
                    config.max_rows,
                    stop,
                    &rows_processed,
                    &skipped,
                    &batches,
                    &events_indexed,
                    &detections_indexed,
                );
            });
        }
    });

    if let Ok(mut store) = shared.lock() {
        store.clear_claims();
    }

    let summary = BackfillSummary {
        events_indexed: events_indexed.load(Ordering::Relaxed),
        detections_indexed: detections_indexed.load(Ordering::Relaxed),
        skipped: skipped.load(Ordering::Relaxed),
        batches: batches.load(Ordering::Relaxed),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        events = summary.events_indexed,
        detections = summary.detections_indexed,
        skipped = summary.skipped,
        batches = summary.batches,
        elapsed_ms = summary.elapsed_ms,
        "backfill complete"
    );
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    shared: &Mutex<&mut Store>,
    resolution: u8,
    batch_size: usize,
    max_rows: Option<u64>,
    stop: &AtomicBool,
    rows_processed: &AtomicU64,
    skipped: &AtomicU64,
    batches: &AtomicU64,
    events_indexed: &AtomicU64,
    detections_indexed: &AtomicU64,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        if let Some(cap) = max_rows {
            if rows_processed.load(Ordering::Relaxed) >= cap {
                return;
            }
        }

        // Claim step: the only cross-worker coordination
        let (event_rows, detection_rows) = {
            let mut store = match shared.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let event_rows = store.claim_unindexed_events(batch_size);
            let remainder = batch_size - event_rows.len();
            let detection_rows = if remainder > 0 {
                store.claim_unindexed_detections(remainder)
            } else {
                Vec::new()
            };
            (event_rows, detection_rows)
        };

        if event_rows.is_empty() && detection_rows.is_empty() {
            return; // nothing left to claim
        }

        // Compute outside the lock
        let event_cells = compute_cells(&event_rows, resolution, skipped);
        let detection_cells = compute_cells(&detection_rows, resolution, skipped);

        // Write back in one batch statement per table
        {
            let mut store = match shared.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            store.set_event_cells(&event_cells);
            store.set_detection_cells(&detection_cells);
        }

        let done = (event_cells.len() + detection_cells.len()) as u64;
        events_indexed.fetch_add(event_cells.len() as u64, Ordering::Relaxed);
        detections_indexed.fetch_add(detection_cells.len() as u64, Ordering::Relaxed);
        rows_processed.fetch_add(done, Ordering::Relaxed);
        batches.fetch_add(1, Ordering::Relaxed);
    }
}

fn compute_cells(rows: &[(u64, GeoPoint)], resolution: u8, skipped: &AtomicU64) -> Vec<(u64, u64)> {
    let mut cells = Vec::with_capacity(rows.len());
    for &(id, point) in rows {
        match cell_id(point.lat, point.lon, resolution) {
            Ok(cell) => cells.push((id, cell)),
            Err(err) => {
                warn!(row = id, %err, "row not indexable, skipping");
                skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    cells
}
