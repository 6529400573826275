//! Episode lifecycle derivation and GEE candidate selection

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::{GeeConfig, RankKey};
use crate::core_types::episode::{Episode, EpisodeStatus};
use crate::core_types::event::Event;

/// Derive an episode's lifecycle status from its current members.
///
/// `Closed` when no members remain; `Active` while any member is active;
/// `Monitoring` while the latest member end time is still inside the
/// monitoring window (the boundary instant itself counts as monitoring);
/// `Extinct` once the window has passed.
pub fn derive_status(
    members: &[&Event],
    now: DateTime<Utc>,
    monitoring_window_days: i64,
) -> EpisodeStatus {
    if members.is_empty() {
        return EpisodeStatus::Closed;
    }
    if members.iter().any(|e| e.status.is_active()) {
        return EpisodeStatus::Active;
    }
    let latest_end = members
        .iter()
        .map(|e| e.ended_at)
        .max()
        .unwrap_or_else(|| now - Duration::days(monitoring_window_days + 1));
    if now <= latest_end + Duration::days(monitoring_window_days) {
        EpisodeStatus::Monitoring
    } else {
        EpisodeStatus::Extinct
    }
}

/// Episode duration in hours, using the latest activity for open episodes
fn duration_hours(episode: &Episode) -> f64 {
    let end = episode.ended_at.unwrap_or(episode.last_activity_at);
    (end - episode.started_at).num_seconds().max(0) as f64 / 3600.0
}

/// Flag and rank GEE candidates in place.
///
/// Only active/monitoring episodes are eligible; eligible episodes must
/// clear every configured floor. Candidates are ranked descending by the
/// configured key with `priority` starting at 1; the optional cap demotes
/// overflow candidates back to non-candidate and clears their rank.
pub fn apply_gee_selection(episodes: &mut [Episode], config: &GeeConfig) {
    for episode in episodes.iter_mut() {
        episode.gee_candidate = false;
        episode.priority = None;
    }

    let mut candidates: Vec<usize> = Vec::new();
    for (idx, episode) in episodes.iter().enumerate() {
        let eligible = matches!(
            episode.status,
            EpisodeStatus::Active | EpisodeStatus::Monitoring
        );
        if !eligible {
            continue;
        }
        if duration_hours(episode) < config.min_duration_hours {
            continue;
        }
        if episode.total_detections < config.min_detections {
            continue;
        }
        if let Some(floor) = config.min_frp_sum {
            if episode.frp_sum < floor {
                continue;
            }
        }
        if let Some(floor) = config.min_frp_max {
            if episode.frp_max < floor {
                continue;
            }
        }
        candidates.push(idx);
    }

    // Descending by rank key, ties by id for stable output
    candidates.sort_by(|&a, &b| {
        rank_value(&episodes[b], config.rank_key)
            .total_cmp(&rank_value(&episodes[a], config.rank_key))
            .then_with(|| episodes[a].id.cmp(&episodes[b].id))
    });

    let cutoff = config.max_candidates.unwrap_or(usize::MAX);
    for (rank, &idx) in candidates.iter().enumerate() {
        if rank < cutoff {
            episodes[idx].gee_candidate = true;
            episodes[idx].priority = Some(rank as u32 + 1);
        } else {
            debug!(episode = episodes[idx].id, "demoted past candidate cap");
        }
    }
}

fn rank_value(episode: &Episode, key: RankKey) -> f64 {
    match key {
        RankKey::FrpSum => episode.frp_sum,
        RankKey::FrpMax => episode.frp_max,
        RankKey::DetectionCount => episode.total_detections as f64,
        RankKey::EstimatedArea => episode.bbox.area_m2(),
        RankKey::Recency => episode.last_activity_at.timestamp() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::event::EventStatus;
    use crate::core_types::geo::{BoundingBox, GeoPoint};
    use chrono::TimeZone;

    fn event(id: u64, status: EventStatus, end_day: u32) -> Event {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 7, end_day, 0, 0, 0).unwrap();
        Event {
            id,
            centroid: GeoPoint::new(40.0, -3.0),
            bbox: BoundingBox::from_point(GeoPoint::new(40.0, -3.0)),
            perimeter: Vec::new(),
            started_at: start,
            ended_at: end,
            last_seen_at: end,
            status,
            total_detections: 10,
            frp_sum: 200.0,
            frp_max: 80.0,
            mean_confidence: 0.9,
            region: None,
            cell_id: None,
            episode_id: None,
        }
    }

    fn episode(id: u64, status: EpisodeStatus, detections: u64, frp_sum: f64) -> Episode {
        let seed = event(id, EventStatus::Extinct, 5);
        let mut episode = Episode::from_event(id, &seed, None);
        episode.status = status;
        episode.total_detections = detections;
        episode.frp_sum = frp_sum;
        episode
    }

    #[test]
    fn test_status_active_dominates() {
        let a = event(1, EventStatus::Active, 5);
        let b = event(2, EventStatus::Extinct, 3);
        let now = Utc.with_ymd_and_hms(2024, 8, 30, 0, 0, 0).unwrap();
        assert_eq!(derive_status(&[&a, &b], now, 15), EpisodeStatus::Active);
    }

    #[test]
    fn test_status_monitoring_window_boundary() {
        // Last member ended July 5; window 15 days ends July 20
        let a = event(1, EventStatus::Extinct, 5);
        let boundary = Utc.with_ymd_and_hms(2024, 7, 20, 0, 0, 0).unwrap();
        assert_eq!(derive_status(&[&a], boundary, 15), EpisodeStatus::Monitoring);
        // One second past the boundary on the next run: extinct
        let past = boundary + Duration::seconds(1);
        assert_eq!(derive_status(&[&a], past, 15), EpisodeStatus::Extinct);
    }

    #[test]
    fn test_scenario_e_twenty_days_quiet_is_extinct() {
        let a = event(1, EventStatus::Extinct, 5);
        let now = Utc.with_ymd_and_hms(2024, 7, 25, 0, 0, 0).unwrap();
        assert_eq!(derive_status(&[&a], now, 15), EpisodeStatus::Extinct);
    }

    #[test]
    fn test_status_closed_without_members() {
        let now = Utc.with_ymd_and_hms(2024, 7, 25, 0, 0, 0).unwrap();
        assert_eq!(derive_status(&[], now, 15), EpisodeStatus::Closed);
    }

    #[test]
    fn test_gee_eligibility_and_ranking() {
        let mut episodes = vec![
            episode(1, EpisodeStatus::Active, 50, 300.0),
            episode(2, EpisodeStatus::Monitoring, 50, 900.0),
            episode(3, EpisodeStatus::Extinct, 50, 9999.0), // ineligible status
            episode(4, EpisodeStatus::Active, 2, 500.0),    // too few detections
        ];
        let config = GeeConfig {
            min_duration_hours: 1.0,
            min_detections: 5,
            ..GeeConfig::default()
        };
        apply_gee_selection(&mut episodes, &config);

        assert!(episodes[0].gee_candidate);
        assert!(episodes[1].gee_candidate);
        assert!(!episodes[2].gee_candidate);
        assert!(!episodes[3].gee_candidate);
        // FRP-sum descending: episode 2 outranks episode 1
        assert_eq!(episodes[1].priority, Some(1));
        assert_eq!(episodes[0].priority, Some(2));
    }

    #[test]
    fn test_gee_cap_demotes_and_clears_rank() {
        let mut episodes = vec![
            episode(1, EpisodeStatus::Active, 50, 300.0),
            episode(2, EpisodeStatus::Active, 50, 900.0),
            episode(3, EpisodeStatus::Active, 50, 600.0),
        ];
        let config = GeeConfig {
            min_duration_hours: 1.0,
            min_detections: 5,
            max_candidates: Some(2),
            ..GeeConfig::default()
        };
        apply_gee_selection(&mut episodes, &config);

        assert!(episodes[1].gee_candidate && episodes[1].priority == Some(1));
        assert!(episodes[2].gee_candidate && episodes[2].priority == Some(2));
        assert!(!episodes[0].gee_candidate);
        assert_eq!(episodes[0].priority, None);
    }

    #[test]
    fn test_gee_frp_floor() {
        let mut episodes = vec![episode(1, EpisodeStatus::Active, 50, 300.0)];
        let config = GeeConfig {
            min_duration_hours: 1.0,
            min_detections: 5,
            min_frp_sum: Some(500.0),
            ..GeeConfig::default()
        };
        apply_gee_selection(&mut episodes, &config);
        assert!(!episodes[0].gee_candidate);
    }
}
