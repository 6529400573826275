//! Duplicate-event consolidation
//!
//! Clustering and ingestion boundaries (orbit edges, batch windows) can
//! produce two event rows for the same physical fire. This pass finds
//! pairs of active events that match on distance, date range and region,
//! and merges each pair: the earlier-starting event survives, the other is
//! absorbed and deleted. Closed and historical events are never touched,
//! preserving audit integrity.
//!
//! Each pair is its own atomic unit of work. Both rows are re-checked
//! before acting, so a victim already absorbed earlier in the run is
//! skipped and a vanished survivor only costs a warning. The pass is safe
//! to re-run to completion.

use std::time::Instant;

use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::config::ConsolidationConfig;
use crate::core_types::event::{spans_touch_within, Event};
use crate::core_types::geo::haversine_distance_m;
use crate::store::{Store, StoreError};
use crate::summary::RunSummary;

/// Run one consolidation pass. Returns the per-run summary; `updated`
/// counts applied merges, `skipped` counts pairs dropped by a referential
/// race or a failed unit of work.
pub fn consolidate_events(
    store: &mut Store,
    config: &ConsolidationConfig,
    dry_run: bool,
) -> RunSummary {
    let started = Instant::now();
    let config = config.clone().clamped();
    let mut summary = RunSummary::new("consolidate");
    summary.dry_run = dry_run;

    let pairs = find_duplicate_pairs(store, &config);
    summary.processed = pairs.len() as u64;
    info!(candidates = pairs.len(), "duplicate event pairs found");

    if dry_run {
        for (a, b) in &pairs {
            debug!(event_a = a, event_b = b, "would merge");
        }
        return summary.finish(started);
    }

    let mut absorbed: FxHashSet<u64> = FxHashSet::default();
    for (a_id, b_id) in pairs {
        // Re-check both rows: an earlier merge in this run may have
        // absorbed either side already. A row missing for any other
        // reason is an unexpected disappearance.
        let (survivor_id, victim_id) = match (store.event(a_id), store.event(b_id)) {
            (Some(a), Some(b)) => {
                if (a.started_at, a.id) <= (b.started_at, b.id) {
                    (a_id, b_id)
                } else {
                    (b_id, a_id)
                }
            }
            (None, Some(_)) | (Some(_), None) | (None, None) => {
                let expected = [a_id, b_id]
                    .iter()
                    .filter(|id| store.event(**id).is_none())
                    .all(|id| absorbed.contains(id));
                if expected {
                    debug!(event_a = a_id, event_b = b_id, "pair absorbed earlier this run, skipping");
                } else {
                    warn!(event_a = a_id, event_b = b_id, "pair row vanished mid-run, skipping");
                }
                summary.skipped += 1;
                continue;
            }
        };

        match store.merge_events(survivor_id, victim_id) {
            Ok(()) => {
                info!(survivor = survivor_id, victim = victim_id, "merged duplicate events");
                absorbed.insert(victim_id);
                summary.updated += 1;
            }
            Err(StoreError::MissingEvent(id)) => {
                warn!(
                    survivor = survivor_id,
                    victim = victim_id,
                    missing = id,
                    "merge target vanished mid-run, skipping pair"
                );
                summary.skipped += 1;
            }
            Err(err) => {
                // One failed unit of work; already-applied merges stay
                warn!(%err, survivor = survivor_id, victim = victim_id, "merge failed");
                summary.skipped += 1;
            }
        }
    }

    summary.finish(started)
}

/// Scan active events for pairs that look like the same fire
fn find_duplicate_pairs(store: &Store, config: &ConsolidationConfig) -> Vec<(u64, u64)> {
    let ids = store.active_event_ids();
    let mut pairs = Vec::new();

    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let (a, b) = match (store.event(ids[i]), store.event(ids[j])) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            if is_duplicate(a, b, config) {
                pairs.push((ids[i], ids[j]));
            }
        }
    }
    pairs
}

/// All conditions must hold: centroid proximity, date ranges touching
/// within the buffer, and matching regions (unknown on either side passes)
fn is_duplicate(a: &Event, b: &Event, config: &ConsolidationConfig) -> bool {
    if haversine_distance_m(a.centroid, b.centroid) > config.distance_threshold_m {
        return false;
    }
    if !spans_touch_within(
        a.started_at,
        a.ended_at,
        b.started_at,
        b.ended_at,
        config.day_buffer,
    ) {
        return false;
    }
    match (&a.region, &b.region) {
        (Some(ra), Some(rb)) => ra == rb,
        _ => true,
    }
}
