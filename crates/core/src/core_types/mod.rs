//! Core types and utilities

pub mod detection;
pub mod episode;
pub mod event;
pub mod geo;

pub use detection::{Confidence, Detection, InvalidDetection};
pub use episode::{Episode, EpisodeStatus};
pub use event::{spans_touch_within, Event, EventStatus, PERIMETER_BUFFER_M};
pub use geo::{
    bounding_perimeter, convex_hull, haversine_distance_m, BoundingBox, GeoPoint, EARTH_RADIUS_M,
};
