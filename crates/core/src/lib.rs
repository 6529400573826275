//! Fire Event Aggregation Core Library
//!
//! Turns a stream of raw satellite thermal-anomaly detections into two
//! layered, queryable fire entities: discrete events (one row per physical
//! fire, built by spatio-temporal clustering) and coarser episodes
//! (regional macro-groupings that bound the cost of downstream satellite
//! imagery processing).
//!
//! ## Pipeline
//!
//! detections -> clustering -> candidate events -> consolidation (dedup)
//! -> canonical events -> episode aggregation -> episodes with lifecycle
//! status and GEE-candidate priority.
//!
//! The consolidator and the episode aggregator must not run concurrently
//! against the same event set: consolidation merges invalidate event
//! identities the aggregator may be mid-processing. The pipeline scheduler
//! owns that ordering; it is not enforced in-process.

// Core types and utilities
pub mod core_types;

// Pipeline stages
pub mod clustering;
pub mod consolidate;
pub mod episodes;
pub mod spatial;

// Shared plumbing
pub mod config;
pub mod store;
pub mod summary;

// Re-export core types
pub use core_types::{Confidence, Detection, Episode, EpisodeStatus, Event, EventStatus};
pub use core_types::{haversine_distance_m, BoundingBox, GeoPoint};

// Re-export pipeline entry points
pub use clustering::{cluster_detections, run_clustering_job, EventDraft};
pub use consolidate::consolidate_events;
pub use episodes::aggregate_episodes;
pub use spatial::{backfill_cells, cell_id, BackfillConfig, BackfillSummary, IndexError};

// Re-export configuration and store
pub use config::{
    AdminMode, AssignmentStrategy, ClusteringConfig, ClusteringVersion, ConfigError,
    ConsolidationConfig, EpisodeConfig, GeeConfig, GeometryMode, PersistenceMode, RankKey,
    ScoreWeights, VersionRegistry,
};
pub use store::{Store, StoreError};
pub use summary::RunSummary;
