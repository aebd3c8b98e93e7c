//! Route definitions and polyline interpolation.
//!
//! Routes are keyed by [`RouteId`]. The built-in table is produced by an
//! exhaustive match over every id, so adding a variant without a definition
//! fails to compile.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bearing::bearing_between;
use crate::color::Color;
use crate::coords::GeoPoint;
use crate::error::Error;

/// Identifier of a known route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteId {
    HanoiHaiPhong,
    HanoiHaLong,
    HanoiNinhBinh,
    HanoiLaoCai,
}

impl RouteId {
    pub const ALL: [RouteId; 4] = [
        RouteId::HanoiHaiPhong,
        RouteId::HanoiHaLong,
        RouteId::HanoiNinhBinh,
        RouteId::HanoiLaoCai,
    ];

    /// Wire name used by the entity feed.
    pub fn as_str(self) -> &'static str {
        match self {
            RouteId::HanoiHaiPhong => "hanoi-hai-phong",
            RouteId::HanoiHaLong => "hanoi-ha-long",
            RouteId::HanoiNinhBinh => "hanoi-ninh-binh",
            RouteId::HanoiLaoCai => "hanoi-lao-cai",
        }
    }

    /// The built-in definition of this route.
    pub fn definition(self) -> RouteDef {
        let (name, color, points): (&str, &str, &[[f64; 2]]) = match self {
            RouteId::HanoiHaiPhong => (
                "Hà Nội – Hải Phòng",
                "#e4572e",
                &[[105.8342, 21.0285], [106.6807, 20.8449]],
            ),
            RouteId::HanoiHaLong => (
                "Hà Nội – Hạ Long",
                "#17bebb",
                &[
                    [105.8342, 21.0285],
                    [106.3146, 20.9373],
                    [106.7035, 21.0068],
                    [107.0843, 20.9517],
                ],
            ),
            RouteId::HanoiNinhBinh => (
                "Hà Nội – Ninh Bình",
                "#ffc914",
                &[[105.8342, 21.0285], [105.9122, 20.5835], [105.9745, 20.2506]],
            ),
            RouteId::HanoiLaoCai => (
                "Hà Nội – Lào Cai",
                "#76b041",
                &[
                    [105.8342, 21.0285],
                    [105.4019, 21.3227],
                    [104.8702, 21.7168],
                    [103.9707, 22.4856],
                ],
            ),
        };
        RouteDef {
            name: name.to_string(),
            color: Color::from_hex(color).unwrap_or_default(),
            points: points.iter().copied().map(GeoPoint::from).collect(),
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RouteId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::UnknownRoute {
                route: s.to_string(),
            })
    }
}

/// Static description of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDef {
    pub name: String,
    pub color: Color,
    pub points: Vec<GeoPoint>,
}

/// A route with its interpolated polyline cached.
#[derive(Debug, Clone)]
pub struct Route {
    id: RouteId,
    name: String,
    color: Color,
    points: Vec<GeoPoint>,
    interpolated: Vec<GeoPoint>,
}

impl Route {
    pub fn new(id: RouteId, def: RouteDef, segments_per_edge: usize) -> Self {
        if def.points.len() < 2 {
            tracing::warn!(
                route = %id,
                points = def.points.len(),
                "route has fewer than two points; vehicles on it will not move"
            );
        }
        let interpolated = interpolate(&def.points, segments_per_edge);
        Self {
            id,
            name: def.name,
            color: def.color,
            points: def.points,
            interpolated,
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// The route's control points as defined.
    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    /// The densified polyline used for sampling.
    pub fn interpolated(&self) -> &[GeoPoint] {
        &self.interpolated
    }

    /// Position at normalized progress `t`.
    pub fn position_at(&self, t: f64) -> Option<GeoPoint> {
        position_at(&self.interpolated, t)
    }

    /// Heading of the segment containing `t`.
    pub fn heading_at(&self, t: f64) -> Option<f64> {
        heading_at(&self.interpolated, t)
    }
}

/// Immutable lookup from [`RouteId`] to [`Route`].
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<RouteId, Route>,
    segments_per_edge: usize,
}

impl RouteTable {
    /// An empty table; routes are added with [`RouteTable::insert`].
    pub fn new(segments_per_edge: usize) -> Self {
        Self {
            routes: BTreeMap::new(),
            segments_per_edge,
        }
    }

    /// A table holding every built-in route.
    pub fn builtin(segments_per_edge: usize) -> Self {
        let mut table = Self::new(segments_per_edge);
        for id in RouteId::ALL {
            table.insert(id, id.definition());
        }
        table
    }

    /// Add or replace a route.
    pub fn insert(&mut self, id: RouteId, def: RouteDef) {
        self.routes
            .insert(id, Route::new(id, def, self.segments_per_edge));
    }

    pub fn get(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn segments_per_edge(&self) -> usize {
        self.segments_per_edge
    }
}

/// Densify a polyline by linear interpolation.
///
/// Each edge contributes `segments_per_edge` points at `t = j / segments_per_edge`
/// for `j` in `0..segments_per_edge`, and the final point is appended once, so a
/// route of `L` points yields `(L - 1) * segments_per_edge + 1` points.
///
/// Fewer than two points are returned unchanged. A segment count of zero is
/// treated as one.
pub fn interpolate(points: &[GeoPoint], segments_per_edge: usize) -> Vec<GeoPoint> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let segments = segments_per_edge.max(1);

    let mut out = Vec::with_capacity((points.len() - 1) * segments + 1);
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for j in 0..segments {
            out.push(a.lerp(b, j as f64 / segments as f64));
        }
    }
    out.push(points[points.len() - 1]);
    out
}

/// Sample a polyline at normalized progress `t` in `[0, 1]`.
///
/// `t` is clamped, not wrapped; NaN is treated as 0. `t = 0` returns the first
/// point and `t = 1` the last point exactly. A single point is returned as-is
/// for any `t`; an empty polyline yields `None`.
pub fn position_at(points: &[GeoPoint], t: f64) -> Option<GeoPoint> {
    let (idx, next, local_t) = segment_at(points, t)?;
    Some(points[idx].lerp(points[next], local_t))
}

/// Bearing of the polyline segment containing progress `t`.
///
/// At `t = 1` the final segment is used. Returns `None` for polylines without
/// a segment or when the segment's endpoints coincide.
pub fn heading_at(points: &[GeoPoint], t: f64) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let (idx, _, _) = segment_at(points, t)?;
    let start = idx.min(points.len() - 2);
    bearing_between(points[start], points[start + 1])
}

/// Returns `(idx, next_idx, local_t)` for progress `t`.
fn segment_at(points: &[GeoPoint], t: f64) -> Option<(usize, usize, f64)> {
    if points.is_empty() {
        return None;
    }
    let last = points.len() - 1;
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let scaled = t * last as f64;
    let idx = (scaled.floor() as usize).min(last);
    let next = (idx + 1).min(last);
    Some((idx, next, scaled - idx as f64))
}
