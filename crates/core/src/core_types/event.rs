//! Fire events: clustered groups of detections representing one physical fire

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::detection::Detection;
use crate::core_types::geo::{bounding_perimeter, BoundingBox, GeoPoint};

/// Buffer applied when an event footprint would otherwise be degenerate
/// (roughly half a VIIRS pixel)
pub const PERIMETER_BUFFER_M: f64 = 375.0;

/// Lifecycle state of a fire event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Monitoring,
    Extinct,
}

impl EventStatus {
    pub fn is_active(self) -> bool {
        matches!(self, EventStatus::Active)
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(EventStatus::Active),
            "monitoring" => Ok(EventStatus::Monitoring),
            "extinct" => Ok(EventStatus::Extinct),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// A clustered physical fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub centroid: GeoPoint,
    pub bbox: BoundingBox,
    /// Convex hull of the member detections, or a buffered box when the
    /// hull would be degenerate
    pub perimeter: Vec<GeoPoint>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: EventStatus,
    pub total_detections: u64,
    pub frp_sum: f64,
    pub frp_max: f64,
    pub mean_confidence: f64,
    pub region: Option<String>,
    #[serde(default)]
    pub cell_id: Option<u64>,
    /// Owning episode; at most one at a time
    #[serde(default)]
    pub episode_id: Option<u64>,
}

impl Event {
    /// Recompute every aggregate from the current member detection set.
    ///
    /// Used after a consolidation merge so the survivor's statistics
    /// reflect its post-merge membership exactly. Detections must be
    /// non-empty; callers guarantee this because merges only ever grow
    /// the survivor's set.
    pub fn recompute_from_detections(&mut self, detections: &[&Detection]) {
        debug_assert!(!detections.is_empty());

        let n = detections.len() as f64;
        let points: Vec<GeoPoint> = detections.iter().map(|d| d.position()).collect();

        let lat_sum: f64 = points.iter().map(|p| p.lat).sum();
        let lon_sum: f64 = points.iter().map(|p| p.lon).sum();
        self.centroid = GeoPoint::new(lat_sum / n, lon_sum / n);

        if let Some(bbox) = BoundingBox::from_points(&points) {
            self.bbox = bbox;
        }
        self.perimeter = bounding_perimeter(&points, PERIMETER_BUFFER_M);

        self.total_detections = detections.len() as u64;
        self.frp_sum = detections.iter().map(|d| d.frp_mw).sum();
        self.frp_max = detections
            .iter()
            .map(|d| d.frp_mw)
            .fold(0.0_f64, f64::max);
        self.mean_confidence =
            detections.iter().map(|d| d.confidence.score()).sum::<f64>() / n;

        if let Some(start) = detections.iter().map(|d| d.acquired_at).min() {
            self.started_at = start;
        }
        if let Some(end) = detections.iter().map(|d| d.acquired_at).max() {
            self.ended_at = end;
            self.last_seen_at = end;
        }
    }

    /// Event duration, clamped at zero for single-detection events
    pub fn duration_hours(&self) -> f64 {
        let secs = (self.ended_at - self.started_at).num_seconds().max(0);
        secs as f64 / 3600.0
    }
}

/// True when two date spans overlap or sit within `buffer_days` of each other
pub fn spans_touch_within(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
    buffer_days: i64,
) -> bool {
    let buffer = Duration::days(buffer_days);
    a_start <= b_end + buffer && b_start <= a_end + buffer
}
