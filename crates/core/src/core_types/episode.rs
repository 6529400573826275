//! Fire episodes: regional macro-aggregates of events
//!
//! Episodes bound the cost of downstream satellite-imagery processing and
//! give visualization a stable human-scale unit. They are built by a
//! single forward pass over events in ascending start order; membership is
//! therefore order-dependent by contract.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::event::Event;
use crate::core_types::geo::{BoundingBox, GeoPoint};

/// Lifecycle state of an episode, derived after each aggregation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Active,
    Monitoring,
    Extinct,
    /// No linked events remain (all absorbed or removed)
    Closed,
}

/// A macro-aggregate of one or more events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: u64,
    pub bbox: BoundingBox,
    /// Detection-count weighted centroid of the member events
    pub centroid: GeoPoint,
    pub started_at: DateTime<Utc>,
    /// None while any member event is still active
    pub ended_at: Option<DateTime<Utc>>,
    /// Most recent member end time, kept even while the episode is open
    pub last_activity_at: DateTime<Utc>,
    pub regions: BTreeSet<String>,
    pub total_detections: u64,
    pub frp_sum: f64,
    pub frp_max: f64,
    pub mean_confidence: f64,
    pub status: EpisodeStatus,
    pub gee_candidate: bool,
    pub priority: Option<u32>,
    /// Clustering configuration version the pass ran under, for reproducibility
    pub clustering_version: Option<String>,
    pub event_ids: Vec<u64>,
}

impl Episode {
    /// Start a new singleton episode around one event
    pub fn from_event(id: u64, event: &Event, clustering_version: Option<String>) -> Self {
        let mut regions = BTreeSet::new();
        if let Some(region) = &event.region {
            regions.insert(region.clone());
        }
        Episode {
            id,
            bbox: event.bbox,
            centroid: event.centroid,
            started_at: event.started_at,
            ended_at: if event.status.is_active() {
                None
            } else {
                Some(event.ended_at)
            },
            last_activity_at: event.ended_at,
            regions,
            total_detections: event.total_detections,
            frp_sum: event.frp_sum,
            frp_max: event.frp_max,
            mean_confidence: event.mean_confidence,
            status: EpisodeStatus::Active,
            gee_candidate: false,
            priority: None,
            clustering_version,
            event_ids: vec![event.id],
        }
    }

    /// Fold an event into this episode, expanding geometry, date span and
    /// aggregates. Detection counts are conserved: the episode total grows
    /// by exactly the event's detection count.
    pub fn fold_event(&mut self, event: &Event) {
        let prev_weight = self.total_detections as f64;
        let weight = event.total_detections as f64;
        let total = prev_weight + weight;

        if total > 0.0 {
            self.centroid = GeoPoint::new(
                (self.centroid.lat * prev_weight + event.centroid.lat * weight) / total,
                (self.centroid.lon * prev_weight + event.centroid.lon * weight) / total,
            );
            self.mean_confidence =
                (self.mean_confidence * prev_weight + event.mean_confidence * weight) / total;
        }

        self.bbox.expand_box(&event.bbox);
        self.started_at = self.started_at.min(event.started_at);
        self.last_activity_at = self.last_activity_at.max(event.ended_at);

        // An open member keeps the episode open; otherwise extend the end
        if event.status.is_active() {
            self.ended_at = None;
        } else if let Some(end) = self.ended_at {
            self.ended_at = Some(end.max(event.ended_at));
        }

        if let Some(region) = &event.region {
            self.regions.insert(region.clone());
        }

        self.total_detections += event.total_detections;
        self.frp_sum += event.frp_sum;
        self.frp_max = self.frp_max.max(event.frp_max);
        self.event_ids.push(event.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::event::EventStatus;
    use chrono::TimeZone;

    fn event(id: u64, lat: f64, lon: f64, day: u32, detections: u64, frp: f64) -> Event {
        let start = Utc.with_ymd_and_hms(2024, 7, day, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 7, day, 12, 0, 0).unwrap();
        Event {
            id,
            centroid: GeoPoint::new(lat, lon),
            bbox: BoundingBox::from_point(GeoPoint::new(lat, lon)),
            perimeter: Vec::new(),
            started_at: start,
            ended_at: end,
            last_seen_at: end,
            status: EventStatus::Extinct,
            total_detections: detections,
            frp_sum: frp,
            frp_max: frp,
            mean_confidence: 0.9,
            region: Some("castilla".to_string()),
            cell_id: None,
            episode_id: None,
        }
    }

    #[test]
    fn test_fold_conserves_detection_count() {
        let a = event(1, 40.0, -3.0, 1, 5, 100.0);
        let b = event(2, 40.1, -3.1, 3, 7, 50.0);
        let mut episode = Episode::from_event(1, &a, None);
        episode.fold_event(&b);
        assert_eq!(episode.total_detections, 12);
        assert_eq!(episode.frp_sum, 150.0);
        assert_eq!(episode.event_ids, vec![1, 2]);
    }

    #[test]
    fn test_fold_weighted_centroid() {
        let a = event(1, 40.0, -3.0, 1, 1, 10.0);
        let b = event(2, 41.0, -3.0, 2, 3, 10.0);
        let mut episode = Episode::from_event(1, &a, None);
        episode.fold_event(&b);
        // Weighted 1:3 towards the second event
        assert!((episode.centroid.lat - 40.75).abs() < 1e-9);
    }

    #[test]
    fn test_fold_active_member_keeps_episode_open() {
        let a = event(1, 40.0, -3.0, 1, 2, 10.0);
        let mut b = event(2, 40.1, -3.0, 3, 2, 10.0);
        b.status = EventStatus::Active;

        let mut episode = Episode::from_event(1, &a, None);
        assert!(episode.ended_at.is_some());
        episode.fold_event(&b);
        assert!(episode.ended_at.is_none());
    }

    #[test]
    fn test_fold_expands_bbox_and_regions() {
        let a = event(1, 40.0, -3.0, 1, 2, 10.0);
        let mut b = event(2, 40.5, -2.5, 2, 2, 10.0);
        b.region = Some("aragon".to_string());

        let mut episode = Episode::from_event(1, &a, None);
        episode.fold_event(&b);
        assert_eq!(episode.bbox.max_lat, 40.5);
        assert_eq!(episode.bbox.max_lon, -2.5);
        assert_eq!(episode.regions.len(), 2);
    }
}
