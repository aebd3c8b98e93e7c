//! Overlay configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Loaded from JSON with [`OverlayConfig::from_json`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::AxisCorrection;
use crate::constants::{BASE_ZOOM, DEFAULT_SEGMENTS_PER_EDGE, DEFAULT_TICK_INTERVAL, WORLD_SCALE};
use crate::coords::{CoordinateTransformer, GeoBounds, GeoPoint};
use crate::error::{Error, Result};
use crate::visual::ScaleDamping;

/// Default map center (Hanoi).
const DEFAULT_CENTER: GeoPoint = GeoPoint::new(105.8342, 21.0285);

/// Default map zoom.
const DEFAULT_ZOOM: f64 = 12.0;

/// Map access token with an explicit fallback.
///
/// Resolved once when the overlay is constructed; the first non-blank value
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessTokenConfig {
    pub primary: Option<String>,
    pub fallback: Option<String>,
}

impl AccessTokenConfig {
    pub fn resolve(&self) -> Option<&str> {
        [self.primary.as_deref(), self.fallback.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|token| !token.is_empty())
    }
}

/// Configuration for an [`crate::Overlay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub access_token: AccessTokenConfig,
    /// Geodetic origin of the local scene frame.
    pub center: GeoPoint,
    pub zoom: f64,
    /// Zoom at which one local unit spans `world_scale` mercator meters.
    pub base_zoom: f64,
    pub world_scale: f64,
    /// Subdivisions per route edge.
    pub segments_per_edge: usize,
    /// Animation tick cadence in milliseconds.
    pub tick_interval_ms: u64,
    /// Rectangle free-roaming entities are clamped to.
    pub free_roam_bounds: GeoBounds,
    pub axis_correction: AxisCorrection,
    pub scale_damping: ScaleDamping,
    /// Base seed for per-entity decoration.
    pub decoration_seed: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            access_token: AccessTokenConfig::default(),
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            base_zoom: BASE_ZOOM,
            world_scale: WORLD_SCALE,
            segments_per_edge: DEFAULT_SEGMENTS_PER_EDGE,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            free_roam_bounds: GeoBounds::default(),
            axis_correction: AxisCorrection::default(),
            scale_damping: ScaleDamping::default(),
            decoration_seed: 0,
        }
    }
}

impl OverlayConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the overlay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(Error::InvalidCoordinate {
                context: "config center",
                lng: self.center.lng,
                lat: self.center.lat,
            });
        }
        for (field, value) in [
            ("zoom", self.zoom),
            ("base_zoom", self.base_zoom),
            ("world_scale", self.world_scale),
        ] {
            if !value.is_finite() {
                return Err(Error::InvalidConfig {
                    field,
                    detail: format!("{value} is not finite"),
                });
            }
        }
        if self.world_scale <= 0.0 {
            return Err(Error::InvalidConfig {
                field: "world_scale",
                detail: format!("{} must be positive", self.world_scale),
            });
        }
        if self.segments_per_edge == 0 {
            return Err(Error::InvalidConfig {
                field: "segments_per_edge",
                detail: "must be at least 1".to_string(),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig {
                field: "tick_interval_ms",
                detail: "must be at least 1".to_string(),
            });
        }
        if !self.free_roam_bounds.is_valid() {
            return Err(Error::InvalidConfig {
                field: "free_roam_bounds",
                detail: format!("{:?} is inverted or not finite", self.free_roam_bounds),
            });
        }
        let correction = self.axis_correction;
        if !correction.rotate_x.is_finite() || !correction.rotate_y.is_finite() {
            return Err(Error::InvalidConfig {
                field: "axis_correction",
                detail: format!("{correction:?} is not finite"),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Transformer for this config's scene frame.
    pub fn transformer(&self) -> Result<CoordinateTransformer> {
        CoordinateTransformer::with_scale(self.center, self.zoom, self.base_zoom, self.world_scale)
    }
}
