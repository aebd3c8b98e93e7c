//! Reconciliation of live entities against GPU-backed scene objects.
//!
//! The registry keeps exactly one [`SceneObject`] per live entity id. New ids
//! allocate a visual once; vanished ids release theirs; ids present on both
//! sides only have their transform and visual state rewritten.

use std::collections::{HashMap, HashSet};

use glam::{Mat4, Quat, Vec3};

use crate::color::Color;
use crate::coords::{CoordinateTransformer, GeoPoint};
use crate::entity::{Entity, EntityId, Motion};
use crate::error::{Error, Result};
use crate::gpu::GpuContext;
use crate::route::RouteTable;
use crate::visual::{EntityVisual, ScaleDamping, VisualSpec, VisualState};

/// Subtitle shown under vehicles that are not on a route.
const FREE_ROAM_SUBTITLE: &str = "Free roam";

/// Height of the picking sphere's center above the ground, at scale 1.
const PICK_CENTER_HEIGHT: f32 = 1.5;

/// Placement of a scene object on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectTransform {
    /// Position in the local frame.
    pub translation: Vec3,
    /// Compass heading in degrees clockwise from north.
    pub heading: f32,
}

impl ObjectTransform {
    /// Rotation about +Y that turns the model's forward axis (-Z, north) to
    /// the heading.
    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(-self.heading.to_radians())
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation(), self.translation)
    }
}

/// The 3D representation of one live entity.
#[derive(Debug)]
pub struct SceneObject {
    id: EntityId,
    transform: ObjectTransform,
    state: VisualState,
    /// Selection requested by the feed, independent of pointer selection.
    feed_selected: bool,
    visual: EntityVisual,
}

impl SceneObject {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn transform(&self) -> &ObjectTransform {
        &self.transform
    }

    pub fn state(&self) -> VisualState {
        self.state
    }

    pub fn visual(&self) -> &EntityVisual {
        &self.visual
    }

    /// Current uniform scale, driven by hover/selection easing.
    pub fn scale(&self) -> f32 {
        self.visual.scale()
    }
}

/// Shared lookups needed to place entities.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub routes: &'a RouteTable,
    pub transformer: &'a CoordinateTransformer,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    /// Entities left out of this pass because their data could not be placed
    /// or their resources could not be allocated.
    pub skipped: usize,
}

/// Where and how an entity should appear this pass.
struct Placement {
    transform: ObjectTransform,
    color: Color,
    subtitle: String,
}

fn place(entity: &Entity, ctx: &PlacementContext<'_>, previous_heading: Option<f32>) -> Result<Placement> {
    let (geo, heading, color, subtitle): (GeoPoint, Option<f32>, Color, String) = match entity.motion {
        Motion::RouteBound { route, progress, .. } => {
            let route = ctx.routes.get(route).ok_or_else(|| Error::UnknownRoute {
                route: route.to_string(),
            })?;
            let geo = route.position_at(progress).ok_or_else(|| Error::InvalidEntity {
                id: entity.id.to_string(),
                detail: format!("route {} has no points", route.id()),
            })?;
            (
                geo,
                route.heading_at(progress).map(|h| h as f32),
                entity.color.unwrap_or(route.color()),
                route.name().to_string(),
            )
        }
        Motion::FreeRoam { position, heading } => (
            position,
            Some(heading as f32),
            entity.color.unwrap_or_default(),
            FREE_ROAM_SUBTITLE.to_string(),
        ),
    };

    let local = ctx.transformer.geo_to_local(geo)?.as_vec3();
    if !local.is_finite() {
        return Err(Error::InvalidCoordinate {
            context: "scene placement",
            lng: geo.lng,
            lat: geo.lat,
        });
    }

    Ok(Placement {
        transform: ObjectTransform {
            translation: local,
            // Degenerate segments keep the last known heading.
            heading: heading.or(previous_heading).unwrap_or(0.0),
        },
        color,
        subtitle,
    })
}

/// Per-entity decoration seed, stable across runs.
fn decoration_seed(base: u64, id: &EntityId) -> u64 {
    base ^ u64::from(xxhash_rust::xxh32::xxh32(id.as_str().as_bytes(), 0))
}

/// Owns every live [`SceneObject`].
#[derive(Debug, Default)]
pub struct SceneObjectRegistry {
    objects: HashMap<EntityId, SceneObject>,
    decoration_seed: u64,
    hovered: Option<EntityId>,
    selected: Option<EntityId>,
}

impl SceneObjectRegistry {
    pub fn new(decoration_seed: u64) -> Self {
        Self {
            decoration_seed,
            ..Self::default()
        }
    }

    /// Bring the scene objects in line with the live entity list.
    ///
    /// Runs in `O(|current| + |incoming|)`. The update path never allocates
    /// GPU resources. A failure on one entity is logged and only that entity
    /// is skipped; an existing object for it is left as it was.
    pub fn reconcile<'e, G, I>(
        &mut self,
        gpu: &mut G,
        entities: I,
        ctx: &PlacementContext<'_>,
    ) -> ReconcileReport
    where
        G: GpuContext + ?Sized,
        I: IntoIterator<Item = &'e Entity>,
    {
        let mut report = ReconcileReport::default();
        let entities: Vec<&Entity> = entities.into_iter().collect();
        let live: HashSet<&EntityId> = entities.iter().map(|e| &e.id).collect();

        let stale: Vec<EntityId> = self
            .objects
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(object) = self.objects.remove(&id) {
                object.visual.dispose(gpu);
                report.removed += 1;
            }
        }
        if self.hovered.as_ref().is_some_and(|id| !live.contains(id)) {
            self.hovered = None;
        }
        if self.selected.as_ref().is_some_and(|id| !live.contains(id)) {
            self.selected = None;
        }

        for entity in entities {
            let previous_heading = self.objects.get(&entity.id).map(|o| o.transform.heading);
            let placement = match place(entity, ctx, previous_heading) {
                Ok(placement) => placement,
                Err(e) => {
                    tracing::warn!(id = %entity.id, error = %e, "skipping entity this pass");
                    report.skipped += 1;
                    continue;
                }
            };

            let hovered = self.hovered.as_ref() == Some(&entity.id);
            let selected = entity.selected || self.selected.as_ref() == Some(&entity.id);
            let state = VisualState {
                moving: entity.moving,
                selected,
                hovered,
            };

            if let Some(object) = self.objects.get_mut(&entity.id) {
                object.transform = placement.transform;
                object.state = state;
                object.feed_selected = entity.selected;
                object
                    .visual
                    .set_appearance(gpu, placement.color, &entity.label, &placement.subtitle);
                report.updated += 1;
                continue;
            }

            let spec = VisualSpec {
                color: placement.color,
                title: entity.label.clone(),
                subtitle: placement.subtitle,
                seed: decoration_seed(self.decoration_seed, &entity.id),
            };
            match EntityVisual::build(gpu, spec) {
                Ok(visual) => {
                    tracing::debug!(id = %entity.id, "created scene object");
                    self.objects.insert(
                        entity.id.clone(),
                        SceneObject {
                            id: entity.id.clone(),
                            transform: placement.transform,
                            state,
                            feed_selected: entity.selected,
                            visual,
                        },
                    );
                    report.created += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %entity.id, error = %e, "could not allocate scene object");
                    report.skipped += 1;
                }
            }
        }

        report
    }

    /// Dispose every scene object.
    pub fn clear<G: GpuContext + ?Sized>(&mut self, gpu: &mut G) {
        let count = self.objects.len();
        for (_, object) in self.objects.drain() {
            object.visual.dispose(gpu);
        }
        self.hovered = None;
        self.selected = None;
        if count > 0 {
            tracing::debug!(count, "disposed all scene objects");
        }
    }

    /// Reallocate every object's GPU resources after a context restore.
    ///
    /// Objects that cannot be rebuilt are dropped without destroying their
    /// handles, which died with the old context. The next [`reconcile`]
    /// creates them again. Returns the number of dropped objects.
    ///
    /// [`reconcile`]: Self::reconcile
    pub fn recreate_resources<G: GpuContext + ?Sized>(&mut self, gpu: &mut G) -> usize {
        let before = self.objects.len();
        self.objects.retain(|id, object| match object.visual.rebuild(gpu) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%id, error = %e, "could not rebuild scene object, dropping it");
                false
            }
        });
        before - self.objects.len()
    }

    /// Mark the hovered entity (or none).
    pub fn set_hovered(&mut self, id: Option<&EntityId>) {
        self.hovered = id.filter(|id| self.objects.contains_key(*id)).cloned();
        for object in self.objects.values_mut() {
            object.state.hovered = self.hovered.as_ref() == Some(&object.id);
        }
    }

    /// Mark the pointer-selected entity (or none).
    pub fn set_selected(&mut self, id: Option<&EntityId>) {
        self.selected = id.filter(|id| self.objects.contains_key(*id)).cloned();
        for object in self.objects.values_mut() {
            object.state.selected =
                object.feed_selected || self.selected.as_ref() == Some(&object.id);
        }
    }

    pub fn hovered(&self) -> Option<&EntityId> {
        self.hovered.as_ref()
    }

    pub fn selected(&self) -> Option<&EntityId> {
        self.selected.as_ref()
    }

    /// Advance every visual's micro-animations.
    pub fn animate(&mut self, dt: f32, damping: ScaleDamping) {
        for object in self.objects.values_mut() {
            object.visual.animate(dt, object.state, damping);
        }
    }

    /// Whether any visual still changes from frame to frame.
    pub fn is_animating(&self) -> bool {
        self.objects
            .values()
            .any(|o| !o.visual.is_settled(o.state))
    }

    pub fn draw<G: GpuContext + ?Sized>(&self, gpu: &mut G, view_proj: &Mat4) {
        for object in self.objects.values() {
            object.visual.draw(gpu, view_proj, object.transform.matrix());
        }
    }

    /// Nearest object whose picking sphere the ray hits.
    ///
    /// `direction` need not be normalized.
    pub fn pick(&self, origin: Vec3, direction: Vec3) -> Option<&EntityId> {
        let direction = direction.try_normalize()?;
        self.objects
            .values()
            .filter_map(|object| {
                let center = object.transform.translation + Vec3::Y * PICK_CENTER_HEIGHT * object.scale();
                let radius = object.visual.pick_radius();
                let to_center = center - origin;
                let along = to_center.dot(direction);
                if along < 0.0 {
                    return None;
                }
                let miss_sq = to_center.length_squared() - along * along;
                (miss_sq <= radius * radius).then_some((along, &object.id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&SceneObject> {
        self.objects.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// GPU resources held across all objects.
    pub fn resource_count(&self) -> usize {
        self.objects.values().map(|o| o.visual.resource_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;
    use crate::route::{RouteDef, RouteId};

    /// Resources one visual holds.
    const PER_OBJECT: usize = 14;

    struct Fixture {
        routes: RouteTable,
        transformer: CoordinateTransformer,
        gpu: HeadlessGpu,
        registry: SceneObjectRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                routes: RouteTable::builtin(20),
                transformer: CoordinateTransformer::new(GeoPoint::new(105.8342, 21.0285), 12.0)
                    .unwrap(),
                gpu: HeadlessGpu::new(),
                registry: SceneObjectRegistry::new(1),
            }
        }

        fn reconcile(&mut self, entities: &[Entity]) -> ReconcileReport {
            let ctx = PlacementContext {
                routes: &self.routes,
                transformer: &self.transformer,
            };
            self.registry.reconcile(&mut self.gpu, entities, &ctx)
        }
    }

    fn fleet() -> Vec<Entity> {
        vec![
            Entity::on_route("a", RouteId::HanoiHaiPhong, 0.01).with_progress(0.3),
            Entity::on_route("b", RouteId::HanoiLaoCai, 0.02),
            Entity::roaming("c", GeoPoint::new(105.9, 21.0), 45.0, 0.001),
        ]
    }

    #[test]
    fn test_reconcile_creates_once() {
        let mut f = Fixture::new();
        let report = f.reconcile(&fleet());
        assert_eq!(report.created, 3);
        assert_eq!(f.registry.len(), 3);
        assert_eq!(f.gpu.live_resources(), 3 * PER_OBJECT);
        assert_eq!(f.registry.resource_count(), f.gpu.live_resources());
    }

    #[test]
    fn test_unchanged_reconcile_allocates_nothing() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());
        let allocations = f.gpu.allocations();

        let report = f.reconcile(&fleet());
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 3);
        assert_eq!(f.gpu.allocations(), allocations);
        assert_eq!(f.gpu.updates(), 0);
    }

    #[test]
    fn test_update_path_moves_without_allocating() {
        let mut f = Fixture::new();
        let mut entities = fleet();
        f.reconcile(&entities);
        let before = f.registry.get(&"a".into()).unwrap().transform().translation;
        let allocations = f.gpu.allocations();

        entities[0] = entities[0].clone().with_progress(0.6);
        entities[0].label = "renamed".to_string();
        entities[0].color = Some(Color::WHITE);
        f.reconcile(&entities);

        let after = f.registry.get(&"a".into()).unwrap().transform().translation;
        assert!(before.distance(after) > 1.0);
        assert_eq!(f.gpu.allocations(), allocations);
    }

    #[test]
    fn test_reconcile_removes_vanished() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());

        let report = f.reconcile(&fleet()[..1]);
        assert_eq!(report.removed, 2);
        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.gpu.live_resources(), PER_OBJECT);

        f.reconcile(&[]);
        assert!(f.registry.is_empty());
        assert_eq!(f.gpu.live_resources(), 0);
    }

    #[test]
    fn test_repeated_reconcile_is_bounded() {
        let mut f = Fixture::new();
        for _ in 0..50 {
            f.reconcile(&fleet());
        }
        assert_eq!(f.registry.len(), 3);
        assert_eq!(f.gpu.live_resources(), 3 * PER_OBJECT);
    }

    #[test]
    fn test_unknown_route_is_isolated() {
        let mut f = Fixture::new();
        f.routes = RouteTable::new(20);
        f.routes.insert(RouteId::HanoiHaiPhong, RouteId::HanoiHaiPhong.definition());

        let report = f.reconcile(&fleet());
        // "b" references a route missing from this table.
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 2);
        assert!(f.registry.get(&"b".into()).is_none());
    }

    #[test]
    fn test_invalid_position_is_isolated() {
        let mut f = Fixture::new();
        let mut entities = fleet();
        entities.push(Entity::roaming("bad", GeoPoint::new(f64::NAN, 21.0), 0.0, 0.0));

        let report = f.reconcile(&entities);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 3);
    }

    #[test]
    fn test_failed_placement_keeps_existing_object() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());
        let before = *f.registry.get(&"c".into()).unwrap().transform();

        let mut entities = fleet();
        entities[2] = Entity::roaming("c", GeoPoint::new(f64::NAN, 0.0), 0.0, 0.0);
        let report = f.reconcile(&entities);

        assert_eq!(report.skipped, 1);
        assert_eq!(*f.registry.get(&"c".into()).unwrap().transform(), before);
    }

    #[test]
    fn test_degenerate_route_keeps_heading() {
        let mut f = Fixture::new();
        let mut entities = vec![Entity::roaming("a", GeoPoint::new(105.9, 21.0), 120.0, 0.0)];
        f.reconcile(&entities);

        // Same object now sits on a route whose two points coincide.
        f.routes.insert(
            RouteId::HanoiHaiPhong,
            RouteDef {
                name: "stuck".to_string(),
                color: Color::WHITE,
                points: vec![GeoPoint::new(105.9, 21.0), GeoPoint::new(105.9, 21.0)],
            },
        );
        entities[0] = Entity::on_route("a", RouteId::HanoiHaiPhong, 0.0);
        f.reconcile(&entities);
        assert_eq!(f.registry.get(&"a".into()).unwrap().transform().heading, 120.0);
    }

    #[test]
    fn test_heading_rotation_faces_route() {
        let t = ObjectTransform {
            translation: Vec3::ZERO,
            heading: 90.0,
        };
        // Model forward is -Z; heading 90 (east) turns it to +X.
        let forward = t.rotation() * Vec3::NEG_Z;
        assert!((forward - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_selection_and_hover() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());

        f.registry.set_selected(Some(&"a".into()));
        f.registry.set_hovered(Some(&"b".into()));
        assert!(f.registry.get(&"a".into()).unwrap().state().selected);
        assert!(f.registry.get(&"b".into()).unwrap().state().hovered);

        // Unknown ids clear the selection.
        f.registry.set_selected(Some(&"zzz".into()));
        assert!(f.registry.selected().is_none());
        assert!(!f.registry.get(&"a".into()).unwrap().state().selected);

        // Removing the hovered entity clears hover.
        f.reconcile(&fleet()[..1]);
        assert!(f.registry.hovered().is_none());
    }

    #[test]
    fn test_pick_nearest() {
        let mut f = Fixture::new();
        let east = f.transformer.local_to_geo(glam::DVec3::new(40.0, 0.0, 0.0));
        let entities = vec![
            Entity::roaming("near", f.transformer.center(), 0.0, 0.0),
            Entity::roaming("far", east, 0.0, 0.0),
        ];
        f.reconcile(&entities);

        // A ray travelling east at body height passes through both.
        let origin = Vec3::new(-100.0, PICK_CENTER_HEIGHT, 0.0);
        assert_eq!(f.registry.pick(origin, Vec3::X), Some(&"near".into()));
        assert_eq!(f.registry.pick(Vec3::new(200.0, 1.5, 0.0), Vec3::NEG_X), Some(&"far".into()));
        assert_eq!(f.registry.pick(origin, Vec3::NEG_X), None);
        assert_eq!(f.registry.pick(Vec3::new(0.0, 1.5, 500.0), Vec3::X), None);
        assert_eq!(f.registry.pick(origin, Vec3::ZERO), None);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());
        f.registry.clear(&mut f.gpu);
        assert!(f.registry.is_empty());
        assert_eq!(f.gpu.live_resources(), 0);
    }

    #[test]
    fn test_recreate_after_context_loss() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());
        f.gpu.lose_context();
        f.gpu.restore_context();
        assert_eq!(f.gpu.live_resources(), 0);

        assert_eq!(f.registry.recreate_resources(&mut f.gpu), 0);
        assert_eq!(f.gpu.live_resources(), 3 * PER_OBJECT);
    }

    #[test]
    fn test_failed_rebuild_is_recreated_on_next_reconcile() {
        let mut f = Fixture::new();
        f.reconcile(&fleet());
        f.gpu.lose_context();
        f.gpu.restore_context();

        f.gpu.fail_next_allocations(1);
        assert_eq!(f.registry.recreate_resources(&mut f.gpu), 1);
        assert_eq!(f.registry.len(), 2);
        assert_eq!(f.registry.resource_count(), f.gpu.live_resources());
        assert_eq!(f.gpu.live_resources(), 2 * PER_OBJECT);

        let report = f.reconcile(&fleet());
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 2);
        assert_eq!(f.registry.len(), 3);
        assert_eq!(f.registry.resource_count(), f.gpu.live_resources());
        assert_eq!(f.gpu.live_resources(), 3 * PER_OBJECT);
    }

    #[test]
    fn test_is_animating() {
        let mut f = Fixture::new();
        let parked = vec![Entity::on_route("a", RouteId::HanoiHaiPhong, 0.0).parked()];
        f.reconcile(&parked);
        assert!(!f.registry.is_animating());

        f.reconcile(&fleet());
        assert!(f.registry.is_animating());
    }
}
