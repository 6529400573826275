//! Event clustering engine
//!
//! Turns a batch of raw detections into candidate fire events through five
//! stages: confidence filter, haversine DBSCAN, temporal-gap splitting,
//! aggregation, and a significance filter. Given a fixed configuration and
//! input set the resulting memberships are deterministic (label numbering
//! may differ between runs, membership does not).

pub mod dbscan;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::ClusteringConfig;
use crate::core_types::detection::Detection;
use crate::core_types::event::PERIMETER_BUFFER_M;
use crate::core_types::geo::{bounding_perimeter, BoundingBox, GeoPoint};
use crate::store::Store;
use crate::summary::RunSummary;

pub use dbscan::dbscan;

/// A clustered group of detections that passed every filter and is ready
/// to be persisted as an event
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub centroid: GeoPoint,
    pub bbox: BoundingBox,
    pub perimeter: Vec<GeoPoint>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_detections: u64,
    pub frp_sum: f64,
    pub frp_max: f64,
    pub mean_confidence: f64,
    pub region: Option<String>,
    pub detection_ids: Vec<u64>,
}

/// Run the full clustering pipeline over a batch of detections.
///
/// Invalid detections (bad coordinates, bad FRP) are logged and skipped;
/// an empty input yields an empty result.
pub fn cluster_detections(detections: &[Detection], config: &ClusteringConfig) -> Vec<EventDraft> {
    // 1. Confidence filter at the ingestion boundary
    let mut filtered: Vec<&Detection> = Vec::with_capacity(detections.len());
    let mut invalid = 0usize;
    for detection in detections {
        if let Err(reason) = detection.validate() {
            debug!(id = detection.id, %reason, "skipping invalid detection");
            invalid += 1;
            continue;
        }
        if detection.confidence.score() >= config.confidence_cutoff {
            filtered.push(detection);
        }
    }
    debug!(
        input = detections.len(),
        kept = filtered.len(),
        invalid,
        "confidence filter applied"
    );
    if filtered.is_empty() {
        return Vec::new();
    }

    // 2. Spatial density clustering; noise is discarded
    let points: Vec<GeoPoint> = filtered.iter().map(|d| d.position()).collect();
    let labels = dbscan(&points, config.spatial_epsilon_km, config.min_samples);

    let mut clusters: BTreeMap<usize, Vec<&Detection>> = BTreeMap::new();
    for (detection, label) in filtered.iter().zip(&labels) {
        if let Some(label) = label {
            clusters.entry(*label).or_default().push(detection);
        }
    }

    // 3 + 4 + 5. Temporal splitting, aggregation, significance filter
    let gap_seconds = (config.temporal_gap_days * 86_400.0) as i64;
    let mut drafts = Vec::new();
    let mut dropped_insignificant = 0usize;

    for members in clusters.into_values() {
        for group in split_temporal(members, gap_seconds) {
            let draft = aggregate(&group);
            if draft.frp_sum < config.min_total_frp
                && draft.total_detections < config.min_detection_count
            {
                dropped_insignificant += 1;
                continue;
            }
            drafts.push(draft);
        }
    }

    info!(
        events = drafts.len(),
        dropped_insignificant,
        "clustering pass complete"
    );
    drafts
}

/// Run one clustering batch job: ingest a detection batch, cluster every
/// still-unassigned detection and persist the resulting drafts as events.
/// `processed` counts the ingested batch, `skipped` the rows rejected at
/// the ingestion boundary, `updated` the events produced.
pub fn run_clustering_job(
    store: &mut Store,
    batch: Vec<Detection>,
    config: &ClusteringConfig,
    dry_run: bool,
) -> RunSummary {
    let started = Instant::now();
    let mut summary = RunSummary::new("cluster");
    summary.dry_run = dry_run;

    let (added, skipped) = store.ingest_detections(batch);
    summary.processed = added + skipped;
    summary.skipped = skipped;

    let drafts = cluster_detections(&store.unassigned_detections(), config);
    summary.updated = drafts.len() as u64;
    if !dry_run {
        store.persist_drafts(drafts);
    }
    summary.finish(started)
}

/// Split a spatial cluster wherever consecutive detections are further
/// apart in time than the configured gap. Two fires can share a footprint
/// weeks apart; this keeps them separate events.
fn split_temporal<'a>(mut members: Vec<&'a Detection>, gap_seconds: i64) -> Vec<Vec<&'a Detection>> {
    members.sort_by_key(|d| (d.acquired_at, d.id));

    let mut groups: Vec<Vec<&Detection>> = Vec::new();
    let mut current: Vec<&Detection> = Vec::new();

    for detection in members {
        if let Some(last) = current.last() {
            let gap = (detection.acquired_at - last.acquired_at).num_seconds();
            if gap > gap_seconds {
                groups.push(std::mem::take(&mut current));
            }
        }
        current.push(detection);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Aggregate one (spatial cluster, temporal sub-cluster) into a draft
fn aggregate(members: &[&Detection]) -> EventDraft {
    let n = members.len() as f64;
    let points: Vec<GeoPoint> = members.iter().map(|d| d.position()).collect();

    let centroid = GeoPoint::new(
        points.iter().map(|p| p.lat).sum::<f64>() / n,
        points.iter().map(|p| p.lon).sum::<f64>() / n,
    );
    // from_points only fails on empty input; members are never empty here
    let bbox = BoundingBox::from_points(&points)
        .unwrap_or_else(|| BoundingBox::from_point(centroid));

    EventDraft {
        centroid,
        bbox,
        perimeter: bounding_perimeter(&points, PERIMETER_BUFFER_M),
        started_at: members.iter().map(|d| d.acquired_at).min().unwrap_or_default(),
        ended_at: members.iter().map(|d| d.acquired_at).max().unwrap_or_default(),
        total_detections: members.len() as u64,
        frp_sum: members.iter().map(|d| d.frp_mw).sum(),
        frp_max: members.iter().map(|d| d.frp_mw).fold(0.0_f64, f64::max),
        mean_confidence: members.iter().map(|d| d.confidence.score()).sum::<f64>() / n,
        region: dominant_region(members),
        detection_ids: members.iter().map(|d| d.id).collect(),
    }
}

/// Most common region among member detections, ties broken alphabetically
fn dominant_region(members: &[&Detection]) -> Option<String> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for detection in members {
        if let Some(region) = &detection.region {
            *counts.entry(region.as_str()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(region, _)| region.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::detection::Confidence;
    use chrono::TimeZone;

    fn detection(
        id: u64,
        lat: f64,
        lon: f64,
        day: u32,
        hour: u32,
        confidence: Confidence,
        frp: f64,
    ) -> Detection {
        Detection {
            id,
            satellite: "NOAA-20".to_string(),
            instrument: "VIIRS".to_string(),
            acquired_at: Utc.with_ymd_and_hms(2024, 7, day, hour, 0, 0).unwrap(),
            latitude: lat,
            longitude: lon,
            confidence,
            frp_mw: frp,
            region: Some("castilla".to_string()),
            event_id: None,
            cell_id: None,
        }
    }

    #[test]
    fn test_empty_input_yields_empty_result() {
        assert!(cluster_detections(&[], &ClusteringConfig::default()).is_empty());
    }

    #[test]
    fn test_scenario_a_two_close_detections_one_event() {
        // 200 m apart, 1 hour apart, high confidence, FRP 50 + 60
        let detections = vec![
            detection(1, 40.0, -3.0, 10, 12, Confidence::High, 50.0),
            detection(2, 40.0018, -3.0, 10, 13, Confidence::High, 60.0),
        ];
        let drafts = cluster_detections(&detections, &ClusteringConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].total_detections, 2);
        assert_eq!(drafts[0].frp_sum, 110.0);
    }

    #[test]
    fn test_scenario_b_distant_detections_stay_apart() {
        // ~50 km apart, same timestamp: spatial gate fails, each alone is
        // noise under min_samples 2, so with min_samples 1 they become two
        // separate single-detection events
        let detections = vec![
            detection(1, 40.0, -3.0, 10, 12, Confidence::High, 50.0),
            detection(2, 40.45, -3.0, 10, 12, Confidence::High, 60.0),
        ];
        let config = ClusteringConfig {
            min_samples: 1,
            min_detection_count: 1,
            min_total_frp: 1.0,
            ..ClusteringConfig::default()
        };
        let drafts = cluster_detections(&detections, &config);
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().all(|d| d.total_detections == 1));
    }

    #[test]
    fn test_low_confidence_filtered_out() {
        let detections = vec![
            detection(1, 40.0, -3.0, 10, 12, Confidence::Low, 50.0),
            detection(2, 40.0018, -3.0, 10, 13, Confidence::Low, 60.0),
        ];
        assert!(cluster_detections(&detections, &ClusteringConfig::default()).is_empty());
    }

    #[test]
    fn test_temporal_gap_splits_same_footprint() {
        // Same location, 10 days apart with a 3-day gap: never one event
        let detections = vec![
            detection(1, 40.0, -3.0, 1, 12, Confidence::High, 50.0),
            detection(2, 40.0005, -3.0, 1, 13, Confidence::High, 50.0),
            detection(3, 40.0, -3.0, 11, 12, Confidence::High, 50.0),
            detection(4, 40.0005, -3.0, 11, 13, Confidence::High, 50.0),
        ];
        let drafts = cluster_detections(&detections, &ClusteringConfig::default());
        assert_eq!(drafts.len(), 2);
        for draft in &drafts {
            assert_eq!(draft.total_detections, 2);
        }
    }

    #[test]
    fn test_significance_filter_requires_both_floors_failed() {
        // One weak pair: FRP sum 4.0 < 10.0 and count 2 < 3 -> dropped.
        // One pair with low FRP but enough detections -> kept.
        let weak = vec![
            detection(1, 40.0, -3.0, 10, 12, Confidence::High, 2.0),
            detection(2, 40.0018, -3.0, 10, 13, Confidence::High, 2.0),
        ];
        let config = ClusteringConfig {
            min_detection_count: 3,
            ..ClusteringConfig::default()
        };
        assert!(cluster_detections(&weak, &config).is_empty());

        let enough = vec![
            detection(1, 40.0, -3.0, 10, 12, Confidence::High, 2.0),
            detection(2, 40.0018, -3.0, 10, 13, Confidence::High, 2.0),
            detection(3, 40.0009, -3.0, 10, 14, Confidence::High, 2.0),
        ];
        let drafts = cluster_detections(&enough, &config);
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn test_invalid_detection_skipped_not_fatal() {
        let mut bad = detection(1, 40.0, -3.0, 10, 12, Confidence::High, 50.0);
        bad.latitude = 120.0;
        let detections = vec![
            bad,
            detection(2, 40.0, -3.0, 10, 12, Confidence::High, 50.0),
            detection(3, 40.0018, -3.0, 10, 13, Confidence::High, 60.0),
        ];
        let drafts = cluster_detections(&detections, &ClusteringConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].total_detections, 2);
    }

    #[test]
    fn test_job_summary_counts_and_elapsed() {
        let mut store = Store::new();
        let mut bad = detection(0, 40.0, -3.0, 10, 12, Confidence::High, 50.0);
        bad.latitude = 200.0;
        let batch = vec![
            bad,
            detection(0, 40.0, -3.0, 10, 12, Confidence::High, 50.0),
            detection(0, 40.0018, -3.0, 10, 13, Confidence::High, 60.0),
        ];
        let summary =
            run_clustering_job(&mut store, batch, &ClusteringConfig::default(), false);

        assert_eq!(summary.job, "cluster");
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn test_job_dry_run_persists_no_events() {
        let mut store = Store::new();
        let batch = vec![
            detection(0, 40.0, -3.0, 10, 12, Confidence::High, 50.0),
            detection(0, 40.0018, -3.0, 10, 13, Confidence::High, 60.0),
        ];
        let summary =
            run_clustering_job(&mut store, batch, &ClusteringConfig::default(), true);
        assert!(summary.dry_run);
        assert_eq!(summary.updated, 1);
        assert_eq!(store.event_count(), 0);
    }

    #[test]
    fn test_draft_carries_member_detection_ids() {
        let detections = vec![
            detection(7, 40.0, -3.0, 10, 12, Confidence::High, 50.0),
            detection(9, 40.0018, -3.0, 10, 13, Confidence::High, 60.0),
        ];
        let drafts = cluster_detections(&detections, &ClusteringConfig::default());
        assert_eq!(drafts[0].detection_ids, vec![7, 9]);
        assert_eq!(drafts[0].region.as_deref(), Some("castilla"));
    }
}
