//! Coordinate conversion utilities.
//!
//! Converts geodetic coordinates (longitude, latitude in degrees) into a
//! local scene frame via spherical Web Mercator.
//!
//! # Local frame
//!
//! The local frame is right-handed and Y-up:
//!
//! - `x` points east,
//! - `y` points up (always 0 for ground-bound placement),
//! - `z` points south, so a heading of 0° (north) faces `-Z`.
//!
//! Every other module (heading rotation, bridge axis correction, picking)
//! relies on this convention.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::constants::{BASE_ZOOM, EARTH_RADIUS_M, MAX_MERCATOR_LAT, WORLD_SCALE};
use crate::error::{Error, Result};

/// A geodetic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Returns whether both components are finite.
    pub fn is_finite(&self) -> bool {
        self.lng.is_finite() && self.lat.is_finite()
    }

    /// Returns this point with latitude clamped to the Mercator limit.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self::new(self.lng, clamp_latitude(self.lat))
    }

    /// Linear blend in geodetic space.
    #[must_use]
    pub fn lerp(self, other: GeoPoint, t: f64) -> Self {
        Self::new(
            self.lng * (1.0 - t) + other.lng * t,
            self.lat * (1.0 - t) + other.lat * t,
        )
    }
}

impl From<[f64; 2]> for GeoPoint {
    /// Takes a `[lng, lat]` pair, the order used by GeoJSON.
    fn from([lng, lat]: [f64; 2]) -> Self {
        Self::new(lng, lat)
    }
}

/// An axis-aligned geodetic rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoBounds {
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Returns whether the rectangle is finite and non-inverted.
    pub fn is_valid(&self) -> bool {
        [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite())
            && self.west <= self.east
            && self.south <= self.north
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.west..=self.east).contains(&point.lng) && (self.south..=self.north).contains(&point.lat)
    }

    /// Hard-clamp a point into the rectangle (no wraparound).
    #[must_use]
    pub fn clamp(&self, point: GeoPoint) -> GeoPoint {
        GeoPoint::new(
            point.lng.clamp(self.west, self.east),
            point.lat.clamp(self.south, self.north),
        )
    }
}

impl Default for GeoBounds {
    /// Northern Vietnam, covering the built-in routes.
    fn default() -> Self {
        Self::new(103.5, 20.0, 107.5, 22.8)
    }
}

/// Clamp a latitude to the Web Mercator limit.
///
/// NaN passes through unchanged; callers validate finiteness separately.
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
}

/// Forward spherical Web Mercator projection, in meters.
pub fn to_mercator(lng: f64, lat: f64) -> DVec2 {
    let lat = clamp_latitude(lat);
    let x = lng.to_radians() * EARTH_RADIUS_M;
    let y = (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
        .tan()
        .ln()
        * EARTH_RADIUS_M;
    DVec2::new(x, y)
}

/// Inverse spherical Web Mercator projection.
pub fn from_mercator(mercator: DVec2) -> GeoPoint {
    let lng = (mercator.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (mercator.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    GeoPoint::new(lng, lat)
}

/// Mercator meters per local unit at the given zoom.
pub fn local_scale(zoom: f64, base_zoom: f64, world_scale: f64) -> f64 {
    (zoom - base_zoom).exp2() * world_scale
}

/// Convert a mercator position into the local frame centered on `center`.
pub fn to_local(mercator: DVec2, center: GeoPoint, zoom: f64) -> DVec3 {
    let origin = to_mercator(center.lng, center.lat);
    mercator_to_local(mercator, origin, local_scale(zoom, BASE_ZOOM, WORLD_SCALE))
}

/// Convert a local ground position back to geodetic coordinates.
///
/// Exact inverse of [`to_mercator`] followed by [`to_local`].
pub fn to_geo(x: f64, z: f64, center: GeoPoint, zoom: f64) -> GeoPoint {
    let origin = to_mercator(center.lng, center.lat);
    local_to_geo(x, z, origin, local_scale(zoom, BASE_ZOOM, WORLD_SCALE))
}

fn mercator_to_local(mercator: DVec2, origin: DVec2, scale: f64) -> DVec3 {
    let delta = (mercator - origin) / scale;
    DVec3::new(delta.x, 0.0, -delta.y)
}

fn local_to_geo(x: f64, z: f64, origin: DVec2, scale: f64) -> GeoPoint {
    from_mercator(DVec2::new(x * scale + origin.x, -z * scale + origin.y))
}

/// Converts between geodetic coordinates and one fixed local frame.
///
/// The projected center and scale are computed once at construction.
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    center: GeoPoint,
    zoom: f64,
    origin: DVec2,
    scale: f64,
}

impl CoordinateTransformer {
    /// Create a transformer using the default base zoom and world scale.
    pub fn new(center: GeoPoint, zoom: f64) -> Result<Self> {
        Self::with_scale(center, zoom, BASE_ZOOM, WORLD_SCALE)
    }

    /// Create a transformer with an explicit base zoom and world scale.
    pub fn with_scale(center: GeoPoint, zoom: f64, base_zoom: f64, world_scale: f64) -> Result<Self> {
        if !center.is_finite() {
            return Err(Error::InvalidCoordinate {
                context: "transformer center",
                lng: center.lng,
                lat: center.lat,
            });
        }
        let scale = local_scale(zoom, base_zoom, world_scale);
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::InvalidConfig {
                field: "zoom",
                detail: format!(
                    "zoom {zoom}, base zoom {base_zoom} and world scale {world_scale} give scale {scale}"
                ),
            });
        }
        let center = center.clamped();
        Ok(Self {
            center,
            zoom,
            origin: to_mercator(center.lng, center.lat),
            scale,
        })
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Mercator meters per local unit.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Project a geodetic point onto the local ground plane.
    pub fn geo_to_local(&self, point: GeoPoint) -> Result<DVec3> {
        if !point.is_finite() {
            return Err(Error::InvalidCoordinate {
                context: "geo_to_local",
                lng: point.lng,
                lat: point.lat,
            });
        }
        Ok(mercator_to_local(
            to_mercator(point.lng, point.lat),
            self.origin,
            self.scale,
        ))
    }

    /// Convert a local position back to geodetic coordinates. `y` is ignored.
    pub fn local_to_geo(&self, local: DVec3) -> GeoPoint {
        local_to_geo(local.x, local.z, self.origin, self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mercator_origin() {
        let m = to_mercator(0.0, 0.0);
        assert!(m.x.abs() < 1e-9);
        assert!(m.y.abs() < 1e-9);
    }

    #[test]
    fn test_mercator_latitude_clamped() {
        // Beyond the limit the projection saturates instead of diverging.
        let pole = to_mercator(0.0, 90.0);
        let limit = to_mercator(0.0, MAX_MERCATOR_LAT);
        assert!(pole.y.is_finite());
        assert_eq!(pole.y, limit.y);

        let south = to_mercator(0.0, -90.0);
        assert!(south.y.is_finite());
        assert!((south.y + limit.y).abs() < 1e-6);
    }

    #[test]
    fn test_local_axes() {
        let center = GeoPoint::new(105.8342, 21.0285);
        let t = CoordinateTransformer::new(center, BASE_ZOOM).unwrap();

        let origin = t.geo_to_local(center).unwrap();
        assert!(origin.length() < 1e-9);

        // East is +X, north is -Z, ground is y = 0.
        let east = t.geo_to_local(GeoPoint::new(105.84, 21.0285)).unwrap();
        assert!(east.x > 0.0);
        assert!(east.z.abs() < 1e-6);
        assert_eq!(east.y, 0.0);

        let north = t.geo_to_local(GeoPoint::new(105.8342, 21.04)).unwrap();
        assert!(north.z < 0.0);
        assert!(north.x.abs() < 1e-6);
    }

    #[test]
    fn test_zoom_scales_local_units() {
        let center = GeoPoint::new(0.0, 0.0);
        let p = GeoPoint::new(0.01, 0.0);
        let base = CoordinateTransformer::new(center, BASE_ZOOM).unwrap();
        let zoomed = CoordinateTransformer::new(center, BASE_ZOOM + 1.0).unwrap();

        let a = base.geo_to_local(p).unwrap();
        let b = zoomed.geo_to_local(p).unwrap();
        assert!((a.x / b.x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_geo_to_local_rejects_nan() {
        let t = CoordinateTransformer::new(GeoPoint::new(0.0, 0.0), 12.0).unwrap();
        let result = t.geo_to_local(GeoPoint::new(f64::NAN, 10.0));
        assert!(matches!(result, Err(Error::InvalidCoordinate { .. })));
    }

    #[test]
    fn test_transformer_rejects_bad_zoom() {
        let result = CoordinateTransformer::new(GeoPoint::new(0.0, 0.0), f64::INFINITY);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_free_functions_match_transformer() {
        let center = GeoPoint::new(106.2, 21.1);
        let zoom = 13.5;
        let t = CoordinateTransformer::new(center, zoom).unwrap();
        let p = GeoPoint::new(106.6807, 20.8449);

        let a = to_local(to_mercator(p.lng, p.lat), center, zoom);
        let b = t.geo_to_local(p).unwrap();
        assert!((a - b).length() < 1e-9);

        let back = to_geo(a.x, a.z, center, zoom);
        assert!((back.lng - p.lng).abs() < 1e-9);
        assert!((back.lat - p.lat).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_clamp() {
        let bounds = GeoBounds::new(0.0, 0.0, 1.0, 1.0);
        let clamped = bounds.clamp(GeoPoint::new(2.0, -1.0));
        assert_eq!(clamped, GeoPoint::new(1.0, 0.0));
        assert!(bounds.contains(clamped));
        assert!(!GeoBounds::new(1.0, 0.0, 0.0, 1.0).is_valid());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            lng in -179.9f64..179.9,
            lat in -84.9f64..84.9,
            center_lng in -179.9f64..179.9,
            center_lat in -84.9f64..84.9,
            zoom in 0.0f64..22.0,
        ) {
            let center = GeoPoint::new(center_lng, center_lat);
            let local = to_local(to_mercator(lng, lat), center, zoom);
            let back = to_geo(local.x, local.z, center, zoom);
            prop_assert!((back.lng - lng).abs() < 1e-6, "lng {} vs {}", back.lng, lng);
            prop_assert!((back.lat - lat).abs() < 1e-6, "lat {} vs {}", back.lat, lat);
        }
    }
}
