//! End-to-end scenario suite for the detection -> event -> episode pipeline
//!
//! Exercises the documented behavioral contracts across module boundaries:
//! detection conservation, consolidation idempotence, episode membership
//! exclusivity, the temporal-gap rule, and the monitoring-window boundary.
//!
//! Run with: cargo test --test pipeline_scenarios

use chrono::{DateTime, TimeZone, Utc};
use fire_events_core::{
    aggregate_episodes, cluster_detections, consolidate_events, ClusteringConfig, Confidence,
    ConsolidationConfig, Detection, EpisodeConfig, EpisodeStatus, Store,
};

#[ctor::ctor]
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn detection(lat: f64, lon: f64, day: u32, hour: u32, frp: f64, region: &str) -> Detection {
    Detection {
        id: 0,
        satellite: "NOAA-20".to_string(),
        instrument: "VIIRS".to_string(),
        acquired_at: Utc.with_ymd_and_hms(2024, 7, day, hour, 0, 0).unwrap(),
        latitude: lat,
        longitude: lon,
        confidence: Confidence::High,
        frp_mw: frp,
        region: Some(region.to_string()),
        event_id: None,
        cell_id: None,
    }
}

fn run_clustering(store: &mut Store, config: &ClusteringConfig) {
    let drafts = cluster_detections(&store.unassigned_detections(), config);
    store.persist_drafts(drafts);
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 20, 0, 0, 0).unwrap()
}

#[test]
fn scenario_a_two_close_detections_become_one_event() {
    let mut store = Store::new();
    store.ingest_detections(vec![
        detection(40.0, -3.0, 10, 12, 50.0, "castilla"),
        detection(40.0018, -3.0, 10, 13, 60.0, "castilla"), // ~200 m, 1 h later
    ]);
    run_clustering(&mut store, &ClusteringConfig::default());

    assert_eq!(store.event_count(), 1);
    let event = store.events().next().unwrap();
    assert_eq!(event.total_detections, 2);
    assert_eq!(event.frp_sum, 110.0);
}

#[test]
fn scenario_b_distant_detections_become_two_events() {
    let mut store = Store::new();
    store.ingest_detections(vec![
        detection(40.0, -3.0, 10, 12, 50.0, "castilla"),
        detection(40.45, -3.0, 10, 12, 60.0, "castilla"), // ~50 km away
    ]);
    let config = ClusteringConfig {
        min_samples: 1,
        min_detection_count: 1,
        min_total_frp: 1.0,
        ..ClusteringConfig::default()
    };
    run_clustering(&mut store, &config);
    assert_eq!(store.event_count(), 2);
}

#[test]
fn scenario_c_consolidation_merges_and_conserves_detections() {
    let mut store = Store::new();
    // Two clusters with centroids ~800 m apart, overlapping dates
    store.ingest_detections(vec![
        detection(40.0, -3.0, 1, 10, 50.0, "castilla"),
        detection(40.001, -3.0, 1, 11, 60.0, "castilla"),
        detection(40.007, -3.0, 2, 10, 40.0, "castilla"),
        detection(40.008, -3.0, 2, 11, 30.0, "castilla"),
    ]);
    let config = ClusteringConfig {
        spatial_epsilon_km: 0.3,
        ..ClusteringConfig::default()
    };
    run_clustering(&mut store, &config);
    assert_eq!(store.event_count(), 2);

    let earlier = store.active_event_ids()[0];
    let later = store.active_event_ids()[1];
    let total_before: u64 = store.events().map(|e| e.total_detections).sum();

    let summary = consolidate_events(&mut store, &ConsolidationConfig::default(), false);
    assert_eq!(summary.updated, 1);

    // The later-starting event was deleted; the earlier one grew
    assert!(store.event(later).is_none());
    let survivor = store.event(earlier).unwrap();
    assert_eq!(survivor.total_detections, total_before);

    // Idempotence: a second pass finds nothing to merge
    let rerun = consolidate_events(&mut store, &ConsolidationConfig::default(), false);
    assert_eq!(rerun.updated, 0);
}

#[test]
fn scenario_d_event_folds_into_nearby_episode() {
    let mut store = Store::new();
    store.ingest_detections(vec![
        detection(40.0, -3.0, 1, 10, 50.0, "castilla"),
        detection(40.0009, -3.0, 1, 11, 60.0, "castilla"),
        // Second fire ~6 km north, three days later
        detection(40.054, -3.0, 4, 10, 40.0, "castilla"),
        detection(40.0549, -3.0, 4, 11, 30.0, "castilla"),
    ]);
    let config = ClusteringConfig {
        spatial_epsilon_km: 0.3,
        ..ClusteringConfig::default()
    };
    run_clustering(&mut store, &config);
    assert_eq!(store.event_count(), 2);

    aggregate_episodes(&mut store, &EpisodeConfig::default(), now(), false).unwrap();

    assert_eq!(store.episode_count(), 1);
    let episode = store.episodes().next().unwrap();
    assert_eq!(episode.event_ids.len(), 2);
    // The episode bbox expanded to cover the new event
    assert!(episode.bbox.max_lat >= 40.054);
    assert!(episode.bbox.min_lat <= 40.0);
}

#[test]
fn scenario_e_quiet_episode_goes_extinct() {
    let mut store = Store::new();
    store.ingest_detections(vec![
        detection(40.0, -3.0, 1, 10, 50.0, "castilla"),
        detection(40.0009, -3.0, 1, 11, 60.0, "castilla"),
    ]);
    run_clustering(&mut store, &ClusteringConfig::default());
    // The fire ended July 1 and nothing since
    for id in store.active_event_ids() {
        store.event_mut(id).unwrap().status = fire_events_core::EventStatus::Extinct;
    }

    // 20 days later, no active members: past the 15-day monitoring window
    let late = Utc.with_ymd_and_hms(2024, 7, 21, 0, 0, 0).unwrap();
    aggregate_episodes(&mut store, &EpisodeConfig::default(), late, false).unwrap();

    let episode = store.episodes().next().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Extinct);
}

#[test]
fn temporal_gap_never_joins_disjoint_fires() {
    let mut store = Store::new();
    // Same footprint, 10 days apart with a 3-day gap rule
    store.ingest_detections(vec![
        detection(40.0, -3.0, 1, 12, 50.0, "castilla"),
        detection(40.0005, -3.0, 1, 13, 50.0, "castilla"),
        detection(40.0, -3.0, 11, 12, 50.0, "castilla"),
        detection(40.0005, -3.0, 11, 13, 50.0, "castilla"),
    ]);
    run_clustering(&mut store, &ClusteringConfig::default());

    assert_eq!(store.event_count(), 2);
    for event in store.events() {
        // No event spans the gap
        assert!(event.duration_hours() < 48.0);
    }
}

#[test]
fn monitoring_window_boundary_is_monotonic() {
    let mut store = Store::new();
    store.ingest_detections(vec![
        detection(40.0, -3.0, 1, 0, 50.0, "castilla"),
        detection(40.0009, -3.0, 1, 0, 60.0, "castilla"),
    ]);
    run_clustering(&mut store, &ClusteringConfig::default());
    for id in store.active_event_ids() {
        store.event_mut(id).unwrap().status = fire_events_core::EventStatus::Extinct;
    }

    // Exactly at the window boundary: still monitoring
    let boundary = Utc.with_ymd_and_hms(2024, 7, 16, 0, 0, 0).unwrap();
    aggregate_episodes(&mut store, &EpisodeConfig::default(), boundary, false).unwrap();
    assert_eq!(
        store.episodes().next().unwrap().status,
        EpisodeStatus::Monitoring
    );

    // The next run, one hour past the boundary: extinct
    let past = Utc.with_ymd_and_hms(2024, 7, 16, 1, 0, 0).unwrap();
    aggregate_episodes(&mut store, &EpisodeConfig::default(), past, false).unwrap();
    assert_eq!(
        store.episodes().next().unwrap().status,
        EpisodeStatus::Extinct
    );
}

#[test]
fn episode_membership_is_exclusive_after_full_pipeline() {
    let mut store = Store::new();
    let mut batch = Vec::new();
    // Three fires along a line, 3 km apart, on consecutive days
    for (i, day) in [(0u32, 1u32), (1, 2), (2, 3)] {
        let lat = 40.0 + f64::from(i) * 0.027;
        batch.push(detection(lat, -3.0, day, 10, 50.0, "castilla"));
        batch.push(detection(lat + 0.0009, -3.0, day, 11, 60.0, "castilla"));
    }
    store.ingest_detections(batch);
    let config = ClusteringConfig {
        spatial_epsilon_km: 0.3,
        ..ClusteringConfig::default()
    };
    run_clustering(&mut store, &config);
    consolidate_events(&mut store, &ConsolidationConfig::default(), false);
    aggregate_episodes(&mut store, &EpisodeConfig::default(), now(), false).unwrap();

    let mut seen = std::collections::HashSet::new();
    for episode in store.episodes() {
        for id in &episode.event_ids {
            assert!(seen.insert(*id), "event {id} linked to two episodes");
        }
    }
    for event in store.events() {
        assert_eq!(
            event.episode_id.is_some(),
            seen.contains(&event.id),
            "store link and membership edge disagree for event {}",
            event.id
        );
    }
}
