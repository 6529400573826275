//! Hierarchical spatial indexing
//!
//! Pure geo-hashing: a (lat, lon, resolution) triple maps to a 64-bit cell
//! id via Morton interleaving of the quantized coordinates. The resolution
//! is baked into the id's high bits, so ids computed at different
//! resolutions never collide; changing the system resolution invalidates
//! every previously computed index, which is why the backfill exists.

pub mod backfill;

use std::fmt;

use crate::core_types::geo::GeoPoint;

pub use backfill::{backfill_cells, BackfillConfig, BackfillSummary};

/// Finest supported resolution: 24 bits per axis fits in the 48 Morton
/// bits below the resolution tag
pub const MAX_RESOLUTION: u8 = 24;

/// Indexing failures are hard failures: there is no degraded fallback, and
/// recurrence queries stay unavailable until the cause is resolved
#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    /// Resolution outside 1..=MAX_RESOLUTION
    InvalidResolution(u8),
    /// Coordinates unusable for indexing
    InvalidCoordinates { lat: f64, lon: f64 },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::InvalidResolution(r) => {
                write!(f, "resolution {r} outside 1..={MAX_RESOLUTION}")
            }
            IndexError::InvalidCoordinates { lat, lon } => {
                write!(f, "coordinates ({lat}, {lon}) cannot be indexed")
            }
        }
    }
}

impl std::error::Error for IndexError {}

/// Compute the hierarchical grid cell id for a point.
///
/// Deterministic and stable for a fixed resolution. At resolution `r` each
/// axis is divided into `2^r` cells; cell ids at resolution `r` nest inside
/// the corresponding cells at `r - 1` (drop the two lowest Morton bits).
///
/// # Errors
/// Returns `IndexError` for an out-of-range resolution or unusable
/// coordinates; indexing has no degraded fallback.
pub fn cell_id(lat: f64, lon: f64, resolution: u8) -> Result<u64, IndexError> {
    if resolution == 0 || resolution > MAX_RESOLUTION {
        return Err(IndexError::InvalidResolution(resolution));
    }
    let point = GeoPoint::new(lat, lon);
    if !point.is_valid() {
        return Err(IndexError::InvalidCoordinates { lat, lon });
    }

    let cells = 1u64 << resolution;
    let max_index = cells - 1;
    // Map [-90, 90] and [-180, 180] onto [0, cells)
    let y = (((lat + 90.0) / 180.0) * cells as f64) as u64;
    let x = (((lon + 180.0) / 360.0) * cells as f64) as u64;
    let y = y.min(max_index);
    let x = x.min(max_index);

    Ok(u64::from(resolution) << 48 | morton_encode(x, y))
}

/// Interleave two 24-bit coordinates into a single Morton code.
/// Nearby cells get nearby codes, which keeps range scans local.
fn morton_encode(x: u64, y: u64) -> u64 {
    let mut result = 0u64;
    for i in 0..24 {
        result |= ((x >> i) & 1) << (2 * i) | ((y >> i) & 1) << (2 * i + 1);
    }
    result
}
