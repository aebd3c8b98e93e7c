//! Initial great-circle bearing between geodetic points.

use crate::coords::GeoPoint;

/// Points closer than this (in degrees on both axes) have no defined bearing.
const DEGENERATE_EPSILON_DEG: f64 = 1e-12;

/// Initial bearing from point 1 to point 2, in degrees clockwise from north.
///
/// Returns a value in `[0, 360)`. Identical or non-finite points have no
/// defined bearing and yield `0.0`; use [`try_bearing`] to tell them apart.
pub fn bearing(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    try_bearing(lat1, lng1, lat2, lng2).unwrap_or(0.0)
}

/// Initial bearing, or `None` when the points are identical or non-finite.
pub fn try_bearing(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Option<f64> {
    if ![lat1, lng1, lat2, lng2].iter().all(|v| v.is_finite()) {
        return None;
    }
    if (lat1 - lat2).abs() < DEGENERATE_EPSILON_DEG && (lng1 - lng2).abs() < DEGENERATE_EPSILON_DEG {
        return None;
    }

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lng2 - lng1).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    Some(normalize_degrees(y.atan2(x).to_degrees()))
}

/// Bearing between two [`GeoPoint`]s, `None` when degenerate.
pub fn bearing_between(from: GeoPoint, to: GeoPoint) -> Option<f64> {
    try_bearing(from.lat, from.lng, to.lat, to.lng)
}

/// Wrap an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}
