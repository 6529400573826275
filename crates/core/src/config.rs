//! Immutable job configuration and the versioned clustering registry
//!
//! Every pass receives an explicit configuration value at construction;
//! there is no ambient global state. Caller-supplied values are clamped to
//! hard caps so an operator override can never push a spatial search or a
//! temporal buffer past what the canonical store can serve.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::event::EventStatus;

/// Hard caps that no caller-supplied override may exceed
pub const MAX_SPATIAL_EPSILON_KM: f64 = 20.0;
pub const MAX_TEMPORAL_GAP_DAYS: f64 = 30.0;
pub const MAX_CONSOLIDATION_DISTANCE_M: f64 = 10_000.0;
pub const MAX_CONSOLIDATION_DAY_BUFFER: i64 = 30;
pub const MAX_EPISODE_DISTANCE_M: f64 = 50_000.0;
pub const MAX_EPISODE_DAYS_BUFFER: i64 = 60;

/// Fatal configuration problems; these abort a job before any processing
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Named clustering version not present in the registry
    UnknownVersion(String),
    /// Registry has no active version to fall back to
    NoActiveVersion,
    /// A field failed parsing or validation
    InvalidValue { field: &'static str, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownVersion(name) => write!(f, "unknown clustering version '{name}'"),
            ConfigError::NoActiveVersion => write!(f, "no active clustering version"),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "invalid value for {field}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the event clustering engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Minimum confidence score (see `Confidence::score`) to keep a detection
    pub confidence_cutoff: f64,
    /// DBSCAN epsilon over great-circle distance
    pub spatial_epsilon_km: f64,
    /// DBSCAN density threshold (neighborhood size including the point itself)
    pub min_samples: usize,
    /// Gap above which a spatial cluster splits into separate fires
    pub temporal_gap_days: f64,
    /// Significance floor: groups below BOTH thresholds are dropped
    pub min_total_frp: f64,
    pub min_detection_count: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        ClusteringConfig {
            confidence_cutoff: 0.5,
            spatial_epsilon_km: 1.0,
            min_samples: 2,
            temporal_gap_days: 3.0,
            min_total_frp: 10.0,
            min_detection_count: 2,
        }
    }
}

impl ClusteringConfig {
    /// Apply hard caps to caller-supplied values
    pub fn clamped(mut self) -> Self {
        self.spatial_epsilon_km = self.spatial_epsilon_km.min(MAX_SPATIAL_EPSILON_KM).max(0.0);
        self.temporal_gap_days = self.temporal_gap_days.min(MAX_TEMPORAL_GAP_DAYS).max(0.0);
        self.min_samples = self.min_samples.max(1);
        self
    }

    /// Adopt the spatial/temporal parameters of a registry version
    pub fn with_version(mut self, version: &ClusteringVersion) -> Self {
        self.spatial_epsilon_km = version.spatial_epsilon_km;
        self.min_samples = version.min_samples;
        self.temporal_gap_days = version.temporal_gap_days;
        self.clamped()
    }
}

/// Configuration for the duplicate-event consolidation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Maximum centroid separation for two events to be merge candidates
    pub distance_threshold_m: f64,
    /// Date ranges may be apart by up to this many days and still match
    pub day_buffer: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        ConsolidationConfig {
            distance_threshold_m: 1000.0,
            day_buffer: 5,
        }
    }
}

impl ConsolidationConfig {
    pub fn clamped(mut self) -> Self {
        self.distance_threshold_m = self
            .distance_threshold_m
            .min(MAX_CONSOLIDATION_DISTANCE_M)
            .max(0.0);
        self.day_buffer = self.day_buffer.clamp(0, MAX_CONSOLIDATION_DAY_BUFFER);
        self
    }
}

/// How the administrative-region gate treats unknown regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminMode {
    /// Gate disabled
    Off,
    /// Regions must match, but an unknown region on either side passes
    Soft,
    /// Regions must match; unknown fails
    Strict,
}

impl FromStr for AdminMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(AdminMode::Off),
            "soft" => Ok(AdminMode::Soft),
            "strict" => Ok(AdminMode::Strict),
            other => Err(ConfigError::InvalidValue {
                field: "admin_mode",
                message: format!("'{other}' (expected off|soft|strict)"),
            }),
        }
    }
}

/// How "distance from an event to an episode" is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryMode {
    /// Raw centroid-to-centroid distance
    Centroid,
    /// Centroid distance minus a fixed buffer
    BufferDistance,
    /// Distance to the episode's inflated bounding box
    HullUnion,
}

impl FromStr for GeometryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "centroid" => Ok(GeometryMode::Centroid),
            "buffer_distance" | "buffer-distance" => Ok(GeometryMode::BufferDistance),
            "hull_union" | "hull-union" => Ok(GeometryMode::HullUnion),
            other => Err(ConfigError::InvalidValue {
                field: "geometry_mode",
                message: format!("'{other}' (expected centroid|buffer_distance|hull_union)"),
            }),
        }
    }
}

/// How an event picks among multiple gate-surviving episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    ClosestDistance,
    /// Greatest temporal overlap, ties broken by distance
    MaxOverlapTime,
    /// Highest weighted score over distance, overlap, intensity and size
    BestScore,
}

impl FromStr for AssignmentStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "closest_distance" | "closest-distance" => Ok(AssignmentStrategy::ClosestDistance),
            "max_overlap_time" | "max-overlap-time" => Ok(AssignmentStrategy::MaxOverlapTime),
            "best_score" | "best-score" => Ok(AssignmentStrategy::BestScore),
            other => Err(ConfigError::InvalidValue {
                field: "strategy",
                message: format!(
                    "'{other}' (expected closest_distance|max_overlap_time|best_score)"
                ),
            }),
        }
    }
}

/// Weights for the `BestScore` assignment strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub distance: f64,
    pub overlap: f64,
    pub intensity: f64,
    pub size: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            distance: 0.4,
            overlap: 0.3,
            intensity: 0.2,
            size: 0.1,
        }
    }
}

/// Ranking key for GEE candidate prioritization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankKey {
    FrpSum,
    FrpMax,
    DetectionCount,
    EstimatedArea,
    Recency,
}

impl FromStr for RankKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "frp_sum" | "frp-sum" => Ok(RankKey::FrpSum),
            "frp_max" | "frp-max" => Ok(RankKey::FrpMax),
            "detection_count" | "detection-count" => Ok(RankKey::DetectionCount),
            "estimated_area" | "estimated-area" => Ok(RankKey::EstimatedArea),
            "recency" => Ok(RankKey::Recency),
            other => Err(ConfigError::InvalidValue {
                field: "rank_key",
                message: format!(
                    "'{other}' (expected frp_sum|frp_max|detection_count|estimated_area|recency)"
                ),
            }),
        }
    }
}

/// Full rebuild truncates all episodes; incremental only folds unassigned events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    FullRebuild,
    Incremental,
}

impl FromStr for PersistenceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full_rebuild" | "full-rebuild" | "rebuild" => Ok(PersistenceMode::FullRebuild),
            "incremental" => Ok(PersistenceMode::Incremental),
            other => Err(ConfigError::InvalidValue {
                field: "persistence",
                message: format!("'{other}' (expected full_rebuild|incremental)"),
            }),
        }
    }
}

/// Thresholds and ranking for GEE candidate selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeeConfig {
    pub min_duration_hours: f64,
    pub min_detections: u64,
    pub min_frp_sum: Option<f64>,
    pub min_frp_max: Option<f64>,
    pub rank_key: RankKey,
    /// Candidates ranked past this cap are demoted back to non-candidate
    pub max_candidates: Option<usize>,
}

impl Default for GeeConfig {
    fn default() -> Self {
        GeeConfig {
            min_duration_hours: 6.0,
            min_detections: 5,
            min_frp_sum: None,
            min_frp_max: None,
            rank_key: RankKey::FrpSum,
            max_candidates: None,
        }
    }
}

/// Configuration for the episode aggregation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeConfig {
    /// Only events in one of these states are folded
    pub input_status: Vec<EventStatus>,
    /// Optional start-date window restricting which events are considered
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub distance_threshold_m: f64,
    pub days_buffer: i64,
    pub admin_mode: AdminMode,
    pub geometry_mode: GeometryMode,
    /// Fixed buffer for `BufferDistance` and inflation for `HullUnion`
    pub geometry_buffer_m: f64,
    pub strategy: AssignmentStrategy,
    pub weights: ScoreWeights,
    pub persistence: PersistenceMode,
    pub monitoring_window_days: i64,
    pub gee: GeeConfig,
    /// Version stamp recorded on every episode the pass touches
    pub clustering_version: Option<String>,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        EpisodeConfig {
            input_status: vec![
                EventStatus::Active,
                EventStatus::Monitoring,
                EventStatus::Extinct,
            ],
            window: None,
            distance_threshold_m: 7000.0,
            days_buffer: 12,
            admin_mode: AdminMode::Soft,
            geometry_mode: GeometryMode::Centroid,
            geometry_buffer_m: 2000.0,
            strategy: AssignmentStrategy::ClosestDistance,
            weights: ScoreWeights::default(),
            persistence: PersistenceMode::FullRebuild,
            monitoring_window_days: 15,
            gee: GeeConfig::default(),
            clustering_version: None,
        }
    }
}

impl EpisodeConfig {
    pub fn clamped(mut self) -> Self {
        self.distance_threshold_m = self
            .distance_threshold_m
            .min(MAX_EPISODE_DISTANCE_M)
            .max(0.0);
        self.days_buffer = self.days_buffer.clamp(0, MAX_EPISODE_DAYS_BUFFER);
        self.monitoring_window_days = self.monitoring_window_days.max(0);
        self.geometry_buffer_m = self.geometry_buffer_m.max(0.0);
        self
    }
}

/// A named, versioned snapshot of the clustering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringVersion {
    pub name: String,
    pub spatial_epsilon_km: f64,
    pub min_samples: usize,
    pub temporal_gap_days: f64,
    pub algorithm: String,
    pub active: bool,
}

/// Registry of clustering versions, keyed by name. Exactly one version is
/// active at any time once the registry is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionRegistry {
    versions: BTreeMap<String, ClusteringVersion>,
}

impl VersionRegistry {
    /// Insert or replace a version. Parameters are clamped to the hard
    /// caps. The first inserted version becomes active.
    pub fn insert(&mut self, mut version: ClusteringVersion) {
        version.spatial_epsilon_km = version
            .spatial_epsilon_km
            .min(MAX_SPATIAL_EPSILON_KM)
            .max(0.0);
        version.temporal_gap_days = version
            .temporal_gap_days
            .min(MAX_TEMPORAL_GAP_DAYS)
            .max(0.0);
        version.min_samples = version.min_samples.max(1);
        if self.versions.is_empty() {
            version.active = true;
        } else if version.active {
            for v in self.versions.values_mut() {
                v.active = false;
            }
        } else if !self.versions.values().any(|v| v.active) {
            version.active = true;
        }
        self.versions.insert(version.name.clone(), version);
    }

    /// Mark a version active, deactivating all others
    pub fn set_active(&mut self, name: &str) -> Result<(), ConfigError> {
        if !self.versions.contains_key(name) {
            return Err(ConfigError::UnknownVersion(name.to_string()));
        }
        for (key, version) in &mut self.versions {
            version.active = key == name;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ClusteringVersion, ConfigError> {
        self.versions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownVersion(name.to_string()))
    }

    pub fn active(&self) -> Result<&ClusteringVersion, ConfigError> {
        self.versions
            .values()
            .find(|v| v.active)
            .ok_or(ConfigError::NoActiveVersion)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(name: &str, epsilon: f64, active: bool) -> ClusteringVersion {
        ClusteringVersion {
            name: name.to_string(),
            spatial_epsilon_km: epsilon,
            min_samples: 2,
            temporal_gap_days: 3.0,
            algorithm: "dbscan".to_string(),
            active,
        }
    }

    #[test]
    fn test_hard_caps_clamp_overrides() {
        let cfg = ClusteringConfig {
            spatial_epsilon_km: 500.0,
            temporal_gap_days: 400.0,
            min_samples: 0,
            ..ClusteringConfig::default()
        }
        .clamped();
        assert_eq!(cfg.spatial_epsilon_km, MAX_SPATIAL_EPSILON_KM);
        assert_eq!(cfg.temporal_gap_days, MAX_TEMPORAL_GAP_DAYS);
        assert_eq!(cfg.min_samples, 1);

        let episode_cfg = EpisodeConfig {
            distance_threshold_m: 1.0e9,
            days_buffer: 10_000,
            ..EpisodeConfig::default()
        }
        .clamped();
        assert_eq!(episode_cfg.distance_threshold_m, MAX_EPISODE_DISTANCE_M);
        assert_eq!(episode_cfg.days_buffer, MAX_EPISODE_DAYS_BUFFER);
    }

    #[test]
    fn test_registry_first_insert_becomes_active() {
        let mut registry = VersionRegistry::default();
        registry.insert(version("v1", 1.0, false));
        assert_eq!(registry.active().unwrap().name, "v1");
    }

    #[test]
    fn test_registry_exactly_one_active() {
        let mut registry = VersionRegistry::default();
        registry.insert(version("v1", 1.0, false));
        registry.insert(version("v2", 2.0, true));
        assert_eq!(registry.active().unwrap().name, "v2");

        registry.set_active("v1").unwrap();
        assert_eq!(registry.active().unwrap().name, "v1");
        assert!(!registry.get("v2").unwrap().active);

        assert!(matches!(
            registry.set_active("missing"),
            Err(ConfigError::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_registry_clamps_version_parameters() {
        let mut registry = VersionRegistry::default();
        registry.insert(version("wild", 9999.0, true));
        assert_eq!(
            registry.get("wild").unwrap().spatial_epsilon_km,
            MAX_SPATIAL_EPSILON_KM
        );
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "best_score".parse::<AssignmentStrategy>().unwrap(),
            AssignmentStrategy::BestScore
        );
        assert!("optimal".parse::<AssignmentStrategy>().is_err());
        assert_eq!("strict".parse::<AdminMode>().unwrap(), AdminMode::Strict);
        assert_eq!(
            "hull_union".parse::<GeometryMode>().unwrap(),
            GeometryMode::HullUnion
        );
        assert_eq!("recency".parse::<RankKey>().unwrap(), RankKey::Recency);
        assert_eq!(
            "incremental".parse::<PersistenceMode>().unwrap(),
            PersistenceMode::Incremental
        );
    }
}
