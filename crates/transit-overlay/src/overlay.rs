//! The overlay facade.
//!
//! [`Overlay`] wires the pieces together for a host:
//!
//! 1. `attach` binds the render bridge and registers the animation timer.
//! 2. Each timer callback (`on_timer`) drains the entity feed, advances
//!    motion and reconciles scene objects.
//! 3. Each host frame (`on_frame`) composes the camera and draws.
//! 4. `teardown` cancels the timer and releases every GPU resource.

use glam::Vec2;

use crate::animation::{AnimationController, TickReport};
use crate::bridge::{FrameOutcome, MapHost, RenderBridge, TimerId};
use crate::config::OverlayConfig;
use crate::coords::CoordinateTransformer;
use crate::entity::{EntityId, EntityRecord, EntityStore, SnapshotReport};
use crate::error::Result;
use crate::feed::FeedReceiver;
use crate::registry::{PlacementContext, ReconcileReport, SceneObjectRegistry};
use crate::route::RouteTable;

type SelectCallback = Box<dyn FnMut(Option<&EntityId>)>;

/// Animated vehicle overlay for a host map.
pub struct Overlay {
    config: OverlayConfig,
    access_token: Option<String>,
    transformer: CoordinateTransformer,
    routes: RouteTable,
    store: EntityStore,
    registry: SceneObjectRegistry,
    animation: AnimationController,
    bridge: RenderBridge,
    feed: Option<FeedReceiver>,
    on_select: Option<SelectCallback>,
}

impl Overlay {
    pub fn new(config: OverlayConfig, routes: RouteTable) -> Result<Self> {
        config.validate()?;
        let transformer = config.transformer()?;
        let access_token = config.access_token.resolve().map(str::to_string);
        Ok(Self {
            access_token,
            transformer,
            routes,
            store: EntityStore::new(),
            registry: SceneObjectRegistry::new(config.decoration_seed),
            animation: AnimationController::new(config.tick_interval(), config.free_roam_bounds),
            bridge: RenderBridge::new(config.axis_correction),
            feed: None,
            on_select: None,
            config,
        })
    }

    /// Receive entity snapshots from a feed, drained on every tick.
    #[must_use]
    pub fn with_feed(mut self, feed: FeedReceiver) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Called with the picked entity (or `None`) on every click.
    pub fn on_select(&mut self, callback: impl FnMut(Option<&EntityId>) + 'static) {
        self.on_select = Some(Box::new(callback));
    }

    /// Bind to a host and start animating.
    pub fn attach<H: MapHost + ?Sized>(&mut self, host: &mut H) {
        if self.bridge.is_attached() {
            tracing::warn!("overlay already attached");
            return;
        }
        self.bridge.on_attach(host, self.access_token.as_deref());
        self.animation.start(host);
        self.reconcile(host);
        host.request_repaint();
    }

    /// Apply a full entity snapshot immediately.
    pub fn push_entities<H: MapHost + ?Sized>(
        &mut self,
        host: &mut H,
        records: Vec<EntityRecord>,
    ) -> SnapshotReport {
        let report = self.store.apply_snapshot(records);
        if self.bridge.is_attached() {
            self.reconcile(host);
            host.request_repaint();
        }
        report
    }

    /// Host timer callback.
    ///
    /// Returns `None` for timers this overlay does not own, including ticks
    /// that arrive after teardown.
    pub fn on_timer<H: MapHost + ?Sized>(&mut self, host: &mut H, timer: TimerId) -> Option<TickReport> {
        if !self.animation.owns_timer(timer) {
            tracing::debug!(?timer, "ignoring foreign timer");
            return None;
        }

        if let Some(snapshot) = self.feed.as_ref().and_then(FeedReceiver::latest) {
            self.store.apply_snapshot(snapshot);
        }

        let dt = self.animation.interval().as_secs_f64();
        let tick = self.animation.tick(self.store.iter_mut(), dt);
        let reconciled = self.reconcile(host);
        tracing::debug!(?tick, ?reconciled, "animation tick");
        host.request_repaint();
        Some(tick)
    }

    fn reconcile<H: MapHost + ?Sized>(&mut self, host: &mut H) -> ReconcileReport {
        if !self.bridge.sync_context(host.gpu(), &mut self.registry) {
            tracing::debug!("deferring reconciliation, gpu context lost");
            return ReconcileReport::default();
        }
        let ctx = PlacementContext {
            routes: &self.routes,
            transformer: &self.transformer,
        };
        let report = self.registry.reconcile(host.gpu(), self.store.iter(), &ctx);
        if report.created > 0 || report.removed > 0 {
            tracing::info!(
                created = report.created,
                removed = report.removed,
                live = self.registry.len(),
                "scene objects changed"
            );
        }
        report
    }

    /// Host frame callback with the host's raw camera matrix.
    pub fn on_frame<H: MapHost + ?Sized>(&mut self, host: &mut H, raw_matrix: &[f32]) -> FrameOutcome {
        self.bridge
            .on_frame(host, &mut self.registry, raw_matrix, self.config.scale_damping)
    }

    /// Like [`Overlay::on_frame`] with an explicit frame delta in seconds.
    pub fn render_frame<H: MapHost + ?Sized>(
        &mut self,
        host: &mut H,
        raw_matrix: &[f32],
        dt: f32,
    ) -> FrameOutcome {
        self.bridge
            .render_frame(host, &mut self.registry, raw_matrix, self.config.scale_damping, dt)
    }

    /// Update hover from a pointer position in normalized device coordinates.
    pub fn pointer_move<H: MapHost + ?Sized>(&mut self, host: &mut H, ndc: Vec2) -> Option<&EntityId> {
        let hovered = self.bridge.pick(&self.registry, ndc).cloned();
        if hovered.as_ref() != self.registry.hovered() {
            self.registry.set_hovered(hovered.as_ref());
            host.request_repaint();
        }
        self.registry.hovered()
    }

    /// Select the entity under the pointer, or clear the selection.
    pub fn pointer_click<H: MapHost + ?Sized>(&mut self, host: &mut H, ndc: Vec2) -> Option<&EntityId> {
        let picked = self.bridge.pick(&self.registry, ndc).cloned();
        self.registry.set_selected(picked.as_ref());
        tracing::debug!(selected = ?picked, "pointer click");
        if let Some(callback) = self.on_select.as_mut() {
            callback(picked.as_ref());
        }
        host.request_repaint();
        self.registry.selected()
    }

    pub fn resize<H: MapHost + ?Sized>(&mut self, host: &mut H, width: u32, height: u32) {
        self.bridge.on_resize(host, width, height);
    }

    /// Stop the timer, release every GPU resource and detach.
    pub fn teardown<H: MapHost + ?Sized>(&mut self, host: &mut H) {
        self.animation.stop(host);
        self.registry.clear(host.gpu());
        self.store.clear();
        if self.bridge.is_attached() {
            self.bridge.on_detach();
        }
        tracing::info!("overlay torn down");
    }

    pub fn is_attached(&self) -> bool {
        self.bridge.is_attached()
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Token resolved from the config at construction.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn entities(&self) -> &EntityStore {
        &self.store
    }

    pub fn registry(&self) -> &SceneObjectRegistry {
        &self.registry
    }

    pub fn bridge(&self) -> &RenderBridge {
        &self.bridge
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        if self.animation.is_running() || !self.registry.is_empty() {
            tracing::warn!(
                timer_running = self.animation.is_running(),
                objects = self.registry.len(),
                "overlay dropped without teardown, timer and gpu resources leaked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::AccessTokenConfig;
    use crate::host::HeadlessHost;

    fn record(id: &str, route: &str, progress: f64) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            route_id: Some(route.to_string()),
            progress: Some(progress),
            moving: true,
            speed: 0.01,
            label: id.to_uppercase(),
            ..Default::default()
        }
    }

    fn overlay() -> Overlay {
        Overlay::new(OverlayConfig::default(), RouteTable::builtin(10)).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = OverlayConfig {
            zoom: f64::NAN,
            ..OverlayConfig::default()
        };
        assert!(Overlay::new(config, RouteTable::builtin(10)).is_err());
    }

    #[test]
    fn test_token_resolved_once() {
        let config = OverlayConfig {
            access_token: AccessTokenConfig {
                primary: None,
                fallback: Some("pk.fallback".to_string()),
            },
            ..OverlayConfig::default()
        };
        let mut overlay = Overlay::new(config, RouteTable::builtin(10)).unwrap();
        let mut host = HeadlessHost::new();
        overlay.attach(&mut host);
        assert_eq!(overlay.access_token(), Some("pk.fallback"));
        assert_eq!(host.access_token(), Some("pk.fallback"));
        overlay.teardown(&mut host);
    }

    #[test]
    fn test_push_before_attach_is_applied_on_attach() {
        let mut overlay = overlay();
        let mut host = HeadlessHost::new();
        overlay.push_entities(&mut host, vec![record("a", "hanoi-hai-phong", 0.2)]);
        assert!(overlay.registry().is_empty());

        overlay.attach(&mut host);
        assert_eq!(overlay.registry().len(), 1);
        overlay.teardown(&mut host);
    }

    #[test]
    fn test_foreign_timer_ignored() {
        let mut overlay = overlay();
        let mut host = HeadlessHost::new();
        overlay.attach(&mut host);
        assert!(overlay.on_timer(&mut host, TimerId(9999)).is_none());
        overlay.teardown(&mut host);
    }

    #[test]
    fn test_click_invokes_callback() {
        let mut overlay = overlay();
        let mut host = HeadlessHost::new();
        let picks: Rc<RefCell<Vec<Option<EntityId>>>> = Rc::default();
        let sink = Rc::clone(&picks);
        overlay.on_select(move |id| sink.borrow_mut().push(id.cloned()));
        overlay.attach(&mut host);

        // No frame drawn yet: nothing can be picked.
        assert!(overlay.pointer_click(&mut host, Vec2::ZERO).is_none());
        assert_eq!(*picks.borrow(), vec![None]);
        overlay.teardown(&mut host);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut overlay = overlay();
        let mut host = HeadlessHost::new();
        overlay.attach(&mut host);
        overlay.push_entities(
            &mut host,
            vec![record("a", "hanoi-hai-phong", 0.2), record("b", "hanoi-lao-cai", 0.7)],
        );
        assert!(host.gpu().live_resources() > 0);

        overlay.teardown(&mut host);
        assert_eq!(host.gpu().live_resources(), 0);
        assert_eq!(host.active_timers(), 0);
        assert!(!overlay.is_attached());
        assert!(overlay.registry().is_empty());
    }
}
