//! Spherical geometry primitives for detection and event footprints
//!
//! All coordinates are WGS84 latitude/longitude in degrees. Distances use
//! the haversine great-circle formula, which is accurate to well under 0.5%
//! at the sub-100 km scales this pipeline operates at.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters (IUGG value)
pub const EARTH_RADIUS_M: f64 = 6371008.8;

/// Meters per degree of latitude (and of longitude at the equator)
pub const METERS_PER_DEGREE: f64 = 111320.0;

/// A point on the Earth's surface in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }

    /// True when both coordinates are finite and inside the WGS84 range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Great-circle distance between two points, in meters
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Axis-aligned bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Degenerate box collapsed onto a single point
    pub fn from_point(p: GeoPoint) -> Self {
        BoundingBox {
            min_lat: p.lat,
            min_lon: p.lon,
            max_lat: p.lat,
            max_lon: p.lon,
        }
    }

    /// Smallest box covering a set of points; `None` for an empty set
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox::from_point(*first);
        for p in &points[1..] {
            bbox.expand_point(*p);
        }
        Some(bbox)
    }

    /// Grow the box to include a point
    pub fn expand_point(&mut self, p: GeoPoint) {
        self.min_lat = self.min_lat.min(p.lat);
        self.min_lon = self.min_lon.min(p.lon);
        self.max_lat = self.max_lat.max(p.lat);
        self.max_lon = self.max_lon.max(p.lon);
    }

    /// Grow the box to include another box
    pub fn expand_box(&mut self, other: &BoundingBox) {
        self.min_lat = self.min_lat.min(other.min_lat);
        self.min_lon = self.min_lon.min(other.min_lon);
        self.max_lat = self.max_lat.max(other.max_lat);
        self.max_lon = self.max_lon.max(other.max_lon);
    }

    /// Geometric center of the box
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// A copy of the box inflated by `meters` on every side
    pub fn inflated(&self, meters: f64) -> BoundingBox {
        let dlat = meters / METERS_PER_DEGREE;
        let cos_lat = self.center().lat.to_radians().cos().max(0.01);
        let dlon = meters / (METERS_PER_DEGREE * cos_lat);
        BoundingBox {
            min_lat: (self.min_lat - dlat).max(-90.0),
            min_lon: (self.min_lon - dlon).max(-180.0),
            max_lat: (self.max_lat + dlat).min(90.0),
            max_lon: (self.max_lon + dlon).min(180.0),
        }
    }

    /// Distance from a point to the box edge in meters; 0 when inside
    pub fn distance_to_point_m(&self, p: GeoPoint) -> f64 {
        let nearest = GeoPoint::new(
            p.lat.clamp(self.min_lat, self.max_lat),
            p.lon.clamp(self.min_lon, self.max_lon),
        );
        haversine_distance_m(p, nearest)
    }

    /// Rough footprint area in square meters, using a local flat-Earth
    /// approximation at the box center
    pub fn area_m2(&self) -> f64 {
        let height_m = (self.max_lat - self.min_lat) * METERS_PER_DEGREE;
        let cos_lat = self.center().lat.to_radians().cos().max(0.01);
        let width_m = (self.max_lon - self.min_lon) * METERS_PER_DEGREE * cos_lat;
        height_m * width_m
    }
}

/// Convex hull of a point set via Andrew's monotone chain.
///
/// Returns the hull in counter-clockwise order without the closing point.
/// Inputs with fewer than 3 distinct points come back as-is; callers that
/// need a real area must buffer those (see [`bounding_perimeter`]).
pub fn convex_hull(points: &[GeoPoint]) -> Vec<GeoPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut sorted: Vec<GeoPoint> = points.to_vec();
    sorted.sort_by(|a, b| {
        a.lon
            .total_cmp(&b.lon)
            .then_with(|| a.lat.total_cmp(&b.lat))
    });
    sorted.dedup_by(|a, b| a.lon == b.lon && a.lat == b.lat);

    if sorted.len() < 3 {
        return sorted;
    }

    fn cross(o: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
        (a.lon - o.lon) * (b.lat - o.lat) - (a.lat - o.lat) * (b.lon - o.lon)
    }

    let mut lower: Vec<GeoPoint> = Vec::new();
    for &p in &sorted {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<GeoPoint> = Vec::new();
    for &p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Bounding perimeter for a group of points: the convex hull when it spans
/// a real area, otherwise the corners of a box buffered by `buffer_m` so the
/// geometry is never degenerate (single pixels and collinear passes included).
pub fn bounding_perimeter(points: &[GeoPoint], buffer_m: f64) -> Vec<GeoPoint> {
    let hull = convex_hull(points);
    if hull.len() >= 3 {
        return hull;
    }

    let bbox = match BoundingBox::from_points(points) {
        Some(b) => b.inflated(buffer_m),
        None => return Vec::new(),
    };

    vec![
        GeoPoint::new(bbox.min_lat, bbox.min_lon),
        GeoPoint::new(bbox.min_lat, bbox.max_lon),
        GeoPoint::new(bbox.max_lat, bbox.max_lon),
        GeoPoint::new(bbox.max_lat, bbox.min_lon),
    ]
}
