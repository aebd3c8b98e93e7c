//! Vehicle entities as pushed by the external feed.
//!
//! [`EntityRecord`] is the wire shape; [`Entity`] is the validated form the
//! rest of the overlay works with. [`EntityStore`] holds the live set and
//! merges feed snapshots into it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bearing::normalize_degrees;
use crate::color::Color;
use crate::coords::GeoPoint;
use crate::error::{Error, Result};
use crate::route::RouteId;

/// Unique identifier of an entity, as assigned by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How an entity moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Follows a route; `progress` is normalized along its polyline.
    RouteBound {
        route: RouteId,
        progress: f64,
        /// Number of times progress has wrapped past 1.0.
        laps: u32,
    },
    /// Moves freely along a compass heading inside a bounding rectangle.
    FreeRoam {
        position: GeoPoint,
        /// Degrees clockwise from north.
        heading: f64,
    },
}

impl Motion {
    /// Whether two motions describe the same kind of movement on the same
    /// route. Locally animated state is kept across snapshots only then.
    fn same_track(&self, other: &Motion) -> bool {
        match (self, other) {
            (Motion::RouteBound { route: a, .. }, Motion::RouteBound { route: b, .. }) => a == b,
            (Motion::FreeRoam { .. }, Motion::FreeRoam { .. }) => true,
            _ => false,
        }
    }
}

/// A validated, live vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub motion: Motion,
    pub moving: bool,
    /// Progress per second for route-bound entities; degrees per tick for
    /// free-roaming ones.
    pub speed: f64,
    /// Paint color; `None` uses the route's color.
    pub color: Option<Color>,
    pub label: String,
    /// Selection requested by the feed.
    pub selected: bool,
}

impl Entity {
    /// A moving route-bound entity at the start of its route.
    pub fn on_route(id: impl Into<EntityId>, route: RouteId, speed: f64) -> Self {
        let id = id.into();
        Self {
            label: id.to_string(),
            id,
            motion: Motion::RouteBound {
                route,
                progress: 0.0,
                laps: 0,
            },
            moving: true,
            speed,
            color: None,
            selected: false,
        }
    }

    /// A moving free-roaming entity.
    pub fn roaming(id: impl Into<EntityId>, position: GeoPoint, heading: f64, speed: f64) -> Self {
        let id = id.into();
        Self {
            label: id.to_string(),
            id,
            motion: Motion::FreeRoam {
                position,
                heading: normalize_degrees(heading),
            },
            moving: true,
            speed,
            color: None,
            selected: false,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, value: f64) -> Self {
        if let Motion::RouteBound { progress, .. } = &mut self.motion {
            *progress = value.clamp(0.0, 1.0);
        }
        self
    }

    #[must_use]
    pub fn parked(mut self) -> Self {
        self.moving = false;
        self
    }

    /// Route this entity follows, if any.
    pub fn route(&self) -> Option<RouteId> {
        match self.motion {
            Motion::RouteBound { route, .. } => Some(route),
            Motion::FreeRoam { .. } => None,
        }
    }
}

/// One entity as received from the feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub position: Option<GeoPoint>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub moving: bool,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub selected: Option<bool>,
}

impl TryFrom<EntityRecord> for Entity {
    type Error = Error;

    fn try_from(record: EntityRecord) -> Result<Self> {
        let invalid = |detail: String| Error::InvalidEntity {
            id: record.id.clone(),
            detail,
        };

        if record.id.is_empty() {
            return Err(invalid("empty id".to_string()));
        }
        if !record.speed.is_finite() || record.speed < 0.0 {
            return Err(invalid(format!("speed {} is not a finite non-negative number", record.speed)));
        }

        let motion = match (&record.route_id, record.position) {
            (Some(route), _) => {
                let route = route.parse::<RouteId>()?;
                let progress = record.progress.unwrap_or(0.0);
                if !progress.is_finite() {
                    return Err(invalid(format!("progress {progress} is not finite")));
                }
                Motion::RouteBound {
                    route,
                    progress: progress.clamp(0.0, 1.0),
                    laps: 0,
                }
            }
            (None, Some(position)) => {
                if !position.is_finite() {
                    return Err(Error::InvalidCoordinate {
                        context: "entity position",
                        lng: position.lng,
                        lat: position.lat,
                    });
                }
                let heading = record.heading.unwrap_or(0.0);
                if !heading.is_finite() {
                    return Err(invalid(format!("heading {heading} is not finite")));
                }
                Motion::FreeRoam {
                    position: position.clamped(),
                    heading: normalize_degrees(heading),
                }
            }
            (None, None) => return Err(invalid("neither routeId nor position given".to_string())),
        };

        let color = record.color.as_deref().and_then(|hex| {
            let parsed = Color::from_hex(hex);
            if parsed.is_none() {
                tracing::debug!(id = %record.id, color = hex, "ignoring unparseable color");
            }
            parsed
        });

        Ok(Entity {
            id: EntityId::new(record.id),
            motion,
            moving: record.moving,
            speed: record.speed,
            color,
            label: record.label,
            selected: record.selected.unwrap_or(false),
        })
    }
}

/// Outcome of merging a feed snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub rejected: usize,
}

/// The live entity set.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live set with a feed snapshot.
    ///
    /// Ids absent from the snapshot are removed. For ids already live, feed
    /// fields are taken from the record but the locally animated progress or
    /// position is kept unless the entity switched route or motion mode.
    /// Invalid records are skipped: a new id is not inserted, and an existing
    /// id keeps its previous state.
    pub fn apply_snapshot(&mut self, records: Vec<EntityRecord>) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        let mut seen: HashSet<EntityId> = HashSet::with_capacity(records.len());

        for record in records {
            let id = EntityId::new(record.id.clone());
            seen.insert(id.clone());

            let incoming = match Entity::try_from(record) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "skipping entity record");
                    report.rejected += 1;
                    continue;
                }
            };

            match self.entities.get_mut(&id) {
                Some(existing) => {
                    let motion = if existing.motion.same_track(&incoming.motion) {
                        existing.motion
                    } else {
                        incoming.motion
                    };
                    *existing = Entity {
                        motion,
                        ..incoming
                    };
                    report.updated += 1;
                }
                None => {
                    self.entities.insert(id, incoming);
                    report.inserted += 1;
                }
            }
        }

        let before = self.entities.len();
        self.entities.retain(|id, _| seen.contains(id));
        report.removed = before - self.entities.len();

        tracing::debug!(?report, live = self.entities.len(), "applied entity snapshot");
        report
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, route: &str) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            route_id: Some(route.to_string()),
            progress: Some(0.25),
            moving: true,
            speed: 0.01,
            label: format!("Bus {id}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_to_route_bound() {
        let entity = Entity::try_from(record("a", "hanoi-ha-long")).unwrap();
        assert_eq!(
            entity.motion,
            Motion::RouteBound {
                route: RouteId::HanoiHaLong,
                progress: 0.25,
                laps: 0
            }
        );
        assert_eq!(entity.label, "Bus a");
    }

    #[test]
    fn test_record_to_free_roam() {
        let rec = EntityRecord {
            id: "taxi".to_string(),
            position: Some(GeoPoint::new(105.85, 21.03)),
            heading: Some(-90.0),
            moving: true,
            speed: 0.0005,
            ..Default::default()
        };
        let entity = Entity::try_from(rec).unwrap();
        match entity.motion {
            Motion::FreeRoam { heading, .. } => assert_eq!(heading, 270.0),
            other => panic!("unexpected motion {other:?}"),
        }
    }

    #[test]
    fn test_record_rejections() {
        let unknown = Entity::try_from(record("a", "nowhere"));
        assert!(matches!(unknown, Err(Error::UnknownRoute { .. })));

        let mut neither = record("b", "hanoi-ha-long");
        neither.route_id = None;
        assert!(matches!(
            Entity::try_from(neither),
            Err(Error::InvalidEntity { .. })
        ));

        let mut bad_speed = record("c", "hanoi-ha-long");
        bad_speed.speed = f64::NAN;
        assert!(Entity::try_from(bad_speed).is_err());

        let mut bad_position = record("d", "hanoi-ha-long");
        bad_position.route_id = None;
        bad_position.position = Some(GeoPoint::new(f64::INFINITY, 0.0));
        assert!(matches!(
            Entity::try_from(bad_position),
            Err(Error::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_record_progress_clamped() {
        let mut rec = record("a", "hanoi-ha-long");
        rec.progress = Some(3.0);
        let entity = Entity::try_from(rec).unwrap();
        assert!(matches!(
            entity.motion,
            Motion::RouteBound { progress, .. } if progress == 1.0
        ));
    }

    #[test]
    fn test_record_deserialize() {
        let json = r##"{
            "id": "bus-7",
            "routeId": "hanoi-hai-phong",
            "progress": 0.5,
            "moving": true,
            "speed": 0.02,
            "color": "#ff0000",
            "label": "29B-123.45",
            "selected": true
        }"##;
        let rec: EntityRecord = serde_json::from_str(json).unwrap();
        let entity = Entity::try_from(rec).unwrap();
        assert_eq!(entity.route(), Some(RouteId::HanoiHaiPhong));
        assert_eq!(entity.color, Color::from_hex("#ff0000"));
        assert!(entity.selected);
    }

    #[test]
    fn test_snapshot_insert_update_remove() {
        let mut store = EntityStore::new();
        let report = store.apply_snapshot(vec![record("a", "hanoi-ha-long"), record("b", "hanoi-lao-cai")]);
        assert_eq!(report.inserted, 2);
        assert_eq!(store.len(), 2);

        let report = store.apply_snapshot(vec![record("b", "hanoi-lao-cai")]);
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);
        assert!(store.get(&"a".into()).is_none());
    }

    #[test]
    fn test_snapshot_keeps_animated_progress() {
        let mut store = EntityStore::new();
        store.apply_snapshot(vec![record("a", "hanoi-ha-long")]);

        if let Motion::RouteBound { progress, .. } = &mut store.iter_mut().next().unwrap().motion {
            *progress = 0.8;
        }

        // Same route: local progress survives the new snapshot.
        store.apply_snapshot(vec![record("a", "hanoi-ha-long")]);
        assert!(matches!(
            store.get(&"a".into()).unwrap().motion,
            Motion::RouteBound { progress, .. } if progress == 0.8
        ));

        // Route change: feed progress wins.
        store.apply_snapshot(vec![record("a", "hanoi-lao-cai")]);
        assert!(matches!(
            store.get(&"a".into()).unwrap().motion,
            Motion::RouteBound { route: RouteId::HanoiLaoCai, progress, .. } if progress == 0.25
        ));
    }

    #[test]
    fn test_snapshot_invalid_record_keeps_previous() {
        let mut store = EntityStore::new();
        store.apply_snapshot(vec![record("a", "hanoi-ha-long")]);

        let report = store.apply_snapshot(vec![record("a", "atlantis"), record("b", "atlantis")]);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.removed, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"a".into()).unwrap().route(), Some(RouteId::HanoiHaLong));
    }
}
