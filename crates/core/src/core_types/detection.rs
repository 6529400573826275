//! Raw satellite thermal-anomaly detections
//!
//! A detection is a single immutable observation from a satellite
//! instrument: a point, a time, a confidence category and a radiative
//! power. Detections enter the system from an external feed and are
//! validated once at the ingestion boundary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::geo::GeoPoint;

/// Confidence category reported by the detection feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Nominal,
    High,
}

impl Confidence {
    /// Numeric score used by the clustering confidence filter and by
    /// per-event confidence averages
    pub fn score(self) -> f64 {
        match self {
            Confidence::Low => 0.3,
            Confidence::Nominal => 0.6,
            Confidence::High => 0.9,
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Confidence::Low),
            "n" | "nominal" => Ok(Confidence::Nominal),
            "h" | "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence category '{other}'")),
        }
    }
}

/// Why a detection was rejected at the ingestion boundary
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidDetection {
    /// Latitude/longitude outside WGS84 range or not finite
    BadCoordinates { lat: f64, lon: f64 },
    /// FRP must be finite and non-negative
    BadFrp(f64),
}

impl fmt::Display for InvalidDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidDetection::BadCoordinates { lat, lon } => {
                write!(f, "invalid coordinates ({lat}, {lon})")
            }
            InvalidDetection::BadFrp(frp) => write!(f, "invalid FRP {frp}"),
        }
    }
}

impl std::error::Error for InvalidDetection {}

/// A single thermal-anomaly observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: u64,
    pub satellite: String,
    pub instrument: String,
    pub acquired_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: Confidence,
    /// Fire Radiative Power in megawatts
    pub frp_mw: f64,
    /// Administrative region, when the feed enrichment provides one
    #[serde(default)]
    pub region: Option<String>,
    /// Owning event, set once clustering persists the group
    #[serde(default)]
    pub event_id: Option<u64>,
    /// Spatial-index cell, set by the backfill job
    #[serde(default)]
    pub cell_id: Option<u64>,
}

impl Detection {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Ingestion-boundary validation. Failures are logged and the
    /// detection is skipped; they never abort a batch.
    pub fn validate(&self) -> Result<(), InvalidDetection> {
        if !self.position().is_valid() {
            return Err(InvalidDetection::BadCoordinates {
                lat: self.latitude,
                lon: self.longitude,
            });
        }
        if !self.frp_mw.is_finite() || self.frp_mw < 0.0 {
            return Err(InvalidDetection::BadFrp(self.frp_mw));
        }
        Ok(())
    }
}
