//! Gates and assignment strategies for folding events into episodes

use chrono::{DateTime, Duration, Utc};

use crate::config::{AdminMode, AssignmentStrategy, GeometryMode, ScoreWeights};
use crate::core_types::episode::Episode;
use crate::core_types::event::Event;
use crate::core_types::geo::haversine_distance_m;

/// Saturation constants for the `BestScore` normalizations: an episode at
/// these magnitudes scores 0.5 on the corresponding term
const FRP_HALF_SATURATION_MW: f64 = 1000.0;
const SIZE_HALF_SATURATION: f64 = 100.0;
const OVERLAP_NORM_DAYS: f64 = 30.0;

/// Effective end of an episode for temporal comparisons: open episodes
/// (any active member) extend to their latest observed activity
fn episode_end(episode: &Episode) -> DateTime<Utc> {
    episode.ended_at.unwrap_or(episode.last_activity_at)
}

/// Temporal gate: the event's span and the episode's span touch within
/// the configured buffer
pub fn temporal_gate(event: &Event, episode: &Episode, days_buffer: i64) -> bool {
    let buffer = Duration::days(days_buffer);
    event.started_at <= episode_end(episode) + buffer
        && episode.started_at <= event.ended_at + buffer
}

/// Administrative gate per mode
pub fn admin_gate(mode: AdminMode, event: &Event, episode: &Episode) -> bool {
    match mode {
        AdminMode::Off => true,
        AdminMode::Soft => match &event.region {
            None => true,
            Some(region) => episode.regions.is_empty() || episode.regions.contains(region),
        },
        AdminMode::Strict => match &event.region {
            None => false,
            Some(region) => episode.regions.contains(region),
        },
    }
}

/// Distance from an event to an episode under the configured geometry mode
pub fn episode_distance_m(
    event: &Event,
    episode: &Episode,
    mode: GeometryMode,
    buffer_m: f64,
) -> f64 {
    match mode {
        GeometryMode::Centroid => haversine_distance_m(event.centroid, episode.centroid),
        GeometryMode::BufferDistance => {
            (haversine_distance_m(event.centroid, episode.centroid) - buffer_m).max(0.0)
        }
        GeometryMode::HullUnion => episode
            .bbox
            .inflated(buffer_m)
            .distance_to_point_m(event.centroid),
    }
}

/// Seconds of overlap between the event's span and the episode's span
pub fn overlap_seconds(event: &Event, episode: &Episode) -> i64 {
    let start = event.started_at.max(episode.started_at);
    let end = event.ended_at.min(episode_end(episode));
    (end - start).num_seconds().max(0)
}

/// Pick one episode among the gate survivors. `candidates` pairs each
/// episode index with its precomputed distance.
pub fn pick_episode(
    event: &Event,
    episodes: &[Episode],
    candidates: &[(usize, f64)],
    strategy: AssignmentStrategy,
    weights: &ScoreWeights,
    distance_threshold_m: f64,
) -> Option<usize> {
    match strategy {
        AssignmentStrategy::ClosestDistance => candidates
            .iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, _)| *idx),
        AssignmentStrategy::MaxOverlapTime => candidates
            .iter()
            .map(|&(idx, distance)| (idx, overlap_seconds(event, &episodes[idx]), distance))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.2.total_cmp(&a.2)))
            .map(|(idx, _, _)| idx),
        AssignmentStrategy::BestScore => candidates
            .iter()
            .map(|&(idx, distance)| {
                let episode = &episodes[idx];
                let closeness = (1.0 - distance / distance_threshold_m.max(1.0)).clamp(0.0, 1.0);
                let overlap_days = overlap_seconds(event, episode) as f64 / 86_400.0;
                let overlap = (overlap_days / OVERLAP_NORM_DAYS).clamp(0.0, 1.0);
                let intensity = episode.frp_sum / (episode.frp_sum + FRP_HALF_SATURATION_MW);
                let size = episode.total_detections as f64
                    / (episode.total_detections as f64 + SIZE_HALF_SATURATION);
                let score = weights.distance * closeness
                    + weights.overlap * overlap
                    + weights.intensity * intensity
                    + weights.size * size;
                (idx, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, _)| idx),
    }
}
