//! Shared geodetic and scene constants.

use std::time::Duration;

/// Earth's mean radius in meters (IUGG mean radius).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Latitude limit of the spherical Web Mercator projection, in degrees.
pub const MAX_MERCATOR_LAT: f64 = 85.051_13;

/// Zoom level at which one local scene unit spans `WORLD_SCALE` mercator meters.
pub const BASE_ZOOM: f64 = 15.0;

/// Mercator meters per local scene unit at `BASE_ZOOM`.
pub const WORLD_SCALE: f64 = 1.0;

/// Default subdivision count for each route edge.
pub const DEFAULT_SEGMENTS_PER_EDGE: usize = 50;

/// Default cadence of the animation tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
