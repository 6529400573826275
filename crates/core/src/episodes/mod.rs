//! Episode aggregation
//!
//! Incrementally folds events into episodes with one forward pass over the
//! events sorted ascending by start date. Membership is order-dependent by
//! contract: episodes track the evolving sequence of regional activity, so
//! the pass is single-threaded and never backtracks or re-balances.

pub mod assignment;
pub mod status;

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{EpisodeConfig, PersistenceMode};
use crate::core_types::episode::Episode;
use crate::core_types::event::Event;
use crate::store::{Store, StoreError};
use crate::summary::RunSummary;

pub use assignment::{admin_gate, episode_distance_m, overlap_seconds, pick_episode, temporal_gate};
pub use status::{apply_gee_selection, derive_status};

/// Run one aggregation pass. `now` anchors the monitoring-window and
/// recency computations so runs are reproducible in tests.
///
/// # Errors
/// Returns `StoreError` only when committing the computed episode set
/// fails; per-event anomalies are logged and skipped.
pub fn aggregate_episodes(
    store: &mut Store,
    config: &EpisodeConfig,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RunSummary, StoreError> {
    let started = Instant::now();
    let config = config.clone().clamped();
    let mut summary = RunSummary::new("episodes");
    summary.dry_run = dry_run;

    // Working set: rebuild from scratch, or extend the persisted episodes
    let mut episodes: Vec<Episode> = match config.persistence {
        PersistenceMode::FullRebuild => Vec::new(),
        PersistenceMode::Incremental => store.episodes().cloned().collect(),
    };
    let mut next_id = match config.persistence {
        PersistenceMode::FullRebuild => 1,
        PersistenceMode::Incremental => store.next_episode_id(),
    };

    // Input events in ascending start order; the sort key is the contract
    let mut inputs: Vec<Event> = store
        .events()
        .filter(|e| config.input_status.contains(&e.status))
        .filter(|e| match &config.window {
            Some((from, to)) => e.started_at >= *from && e.started_at <= *to,
            None => true,
        })
        .filter(|e| {
            config.persistence == PersistenceMode::FullRebuild || e.episode_id.is_none()
        })
        .cloned()
        .collect();
    inputs.sort_by_key(|e| (e.started_at, e.id));

    for event in &inputs {
        summary.processed += 1;

        if !event.centroid.is_valid() {
            warn!(event = event.id, "event has no usable centroid, skipping");
            summary.skipped += 1;
            continue;
        }

        // Three independent gates, then distance per geometry mode
        let candidates: Vec<(usize, f64)> = episodes
            .iter()
            .enumerate()
            .filter(|(_, ep)| temporal_gate(event, ep, config.days_buffer))
            .filter(|(_, ep)| admin_gate(config.admin_mode, event, ep))
            .filter_map(|(idx, ep)| {
                let distance =
                    episode_distance_m(event, ep, config.geometry_mode, config.geometry_buffer_m);
                (distance <= config.distance_threshold_m).then_some((idx, distance))
            })
            .collect();

        if candidates.is_empty() {
            let episode =
                Episode::from_event(next_id, event, config.clustering_version.clone());
            debug!(event = event.id, episode = next_id, "started new episode");
            next_id += 1;
            episodes.push(episode);
            summary.updated += 1;
            continue;
        }

        let choice = pick_episode(
            event,
            &episodes,
            &candidates,
            config.strategy,
            &config.weights,
            config.distance_threshold_m,
        );
        if let Some(idx) = choice {
            debug!(event = event.id, episode = episodes[idx].id, "folded into episode");
            episodes[idx].fold_event(event);
            // Every episode the pass touches carries the version it ran under
            episodes[idx].clustering_version = config.clustering_version.clone();
            summary.updated += 1;
        }
    }

    // Post-pass: derive lifecycle status from the full membership, then
    // select and rank GEE candidates
    for episode in &mut episodes {
        let members: Vec<&Event> = episode
            .event_ids
            .iter()
            .filter_map(|&id| {
                // New memberships from this pass are in `inputs`
                inputs
                    .iter()
                    .find(|e| e.id == id)
                    .or_else(|| store.event(id))
            })
            .collect();
        episode.status = derive_status(&members, now, config.monitoring_window_days);
    }
    apply_gee_selection(&mut episodes, &config.gee);

    let candidates = episodes.iter().filter(|e| e.gee_candidate).count();
    info!(
        episodes = episodes.len(),
        gee_candidates = candidates,
        "aggregation pass computed"
    );

    if dry_run {
        return Ok(summary.finish(started));
    }

    store.replace_episodes(episodes)?;
    Ok(summary.finish(started))
}
