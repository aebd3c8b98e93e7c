//! Compositing the local scene into the host map's camera.
//!
//! The host owns the canvas, the GPU context and the camera. Once per host
//! frame it hands over a raw 16-float column-major view-projection matrix in
//! its own frame: right-handed, Z up, +Y north. The local scene is
//! right-handed and Y up with -Z north (see [`crate::coords`]), so a fixed
//! axis correction is composed onto the host matrix before drawing.

use std::f32::consts::FRAC_PI_2;
use std::time::Duration;

use glam::{Mat4, Vec2};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::entity::EntityId;
use crate::error::{Error, Result};
use crate::gpu::{GpuContext, Lighting};
use crate::registry::SceneObjectRegistry;
use crate::visual::ScaleDamping;

/// Identifier of a periodic timer registered with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// What the overlay needs from the host map renderer.
pub trait MapHost {
    type Gpu: GpuContext;

    /// The GPU context shared with the host. Never exclusively ours.
    fn gpu(&mut self) -> &mut Self::Gpu;

    /// Hand the resolved map access token to the host.
    fn configure(&mut self, access_token: Option<&str>);

    /// Ask the host to schedule another frame.
    fn request_repaint(&mut self);

    /// Register a periodic callback; the host calls back with the returned id.
    fn set_interval(&mut self, interval: Duration) -> TimerId;

    fn clear_interval(&mut self, timer: TimerId);
}

/// Fixed rotations applied after the host matrix, in radians.
///
/// The composed matrix is `host * Rx(rotate_x) * Ry(rotate_y)`. The defaults
/// turn local `+Y` (up) into host `+Z` and local `-Z` (north) into host `+Y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisCorrection {
    pub rotate_x: f32,
    pub rotate_y: f32,
}

impl Default for AxisCorrection {
    fn default() -> Self {
        Self {
            rotate_x: FRAC_PI_2,
            rotate_y: 0.0,
        }
    }
}

impl AxisCorrection {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_x(self.rotate_x) * Mat4::from_rotation_y(self.rotate_y)
    }
}

/// Parse a raw host matrix, rejecting anything that cannot be drawn with.
pub fn parse_projection(raw: &[f32]) -> Result<Mat4> {
    let values: &[f32; 16] = raw.try_into().map_err(|_| Error::InvalidMatrix {
        detail: format!("expected 16 values, got {}", raw.len()),
    })?;
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(Error::InvalidMatrix {
            detail: format!("element {index} is {}", values[index]),
        });
    }
    let matrix = Mat4::from_cols_array(values);
    let determinant = matrix.determinant();
    if determinant == 0.0 || !determinant.is_finite() {
        return Err(Error::InvalidMatrix {
            detail: "matrix is singular".to_string(),
        });
    }
    Ok(matrix)
}

/// Why a frame drew nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidMatrix,
    ContextLost,
}

/// Result of one host frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn {
        objects: usize,
        /// Whether another frame was requested.
        repaint: bool,
    },
    Skipped(SkipReason),
    /// The bridge is not attached to a host.
    Detached,
}

/// Injects the scene into the host's per-frame camera pipeline.
#[derive(Debug)]
pub struct RenderBridge {
    correction: AxisCorrection,
    lighting: Lighting,
    attached: bool,
    /// Context generation our resources belong to.
    generation: Option<u64>,
    last_frame: Option<Instant>,
    /// Last composed view-projection, for picking.
    view_proj: Option<Mat4>,
}

impl RenderBridge {
    pub fn new(correction: AxisCorrection) -> Self {
        Self {
            correction,
            lighting: Lighting::default(),
            attached: false,
            generation: None,
            last_frame: None,
            view_proj: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Bind to the host: pass the access token and set up the scene.
    pub fn on_attach<H: MapHost + ?Sized>(&mut self, host: &mut H, access_token: Option<&str>) {
        if access_token.is_none() {
            tracing::warn!("no map access token configured");
        }
        host.configure(access_token);
        let gpu = host.gpu();
        gpu.set_lighting(&self.lighting);
        self.generation = Some(gpu.generation());
        self.attached = true;
        self.last_frame = None;
        self.view_proj = None;
        tracing::info!("render bridge attached");
    }

    /// Recreate resources if the context was restored since we last used it.
    ///
    /// Returns `false` while the context is lost.
    pub fn sync_context<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
        registry: &mut SceneObjectRegistry,
    ) -> bool {
        if gpu.is_lost() {
            return false;
        }
        let generation = gpu.generation();
        if self.generation != Some(generation) {
            tracing::info!(generation, objects = registry.len(), "gpu context restored, recreating resources");
            gpu.set_lighting(&self.lighting);
            let failures = registry.recreate_resources(gpu);
            if failures > 0 {
                tracing::warn!(failures, "dropped scene objects that could not be recreated");
            }
            self.generation = Some(generation);
        }
        true
    }

    /// Per-frame entry point; measures the frame delta itself.
    pub fn on_frame<H: MapHost + ?Sized>(
        &mut self,
        host: &mut H,
        registry: &mut SceneObjectRegistry,
        raw_matrix: &[f32],
        damping: ScaleDamping,
    ) -> FrameOutcome {
        let now = Instant::now();
        let dt = self
            .last_frame
            .map_or(0.0, |previous| now.duration_since(previous).as_secs_f32());
        self.last_frame = Some(now);
        self.render_frame(host, registry, raw_matrix, damping, dt)
    }

    /// Draw one frame with an explicit delta in seconds.
    pub fn render_frame<H: MapHost + ?Sized>(
        &mut self,
        host: &mut H,
        registry: &mut SceneObjectRegistry,
        raw_matrix: &[f32],
        damping: ScaleDamping,
        dt: f32,
    ) -> FrameOutcome {
        if !self.attached {
            return FrameOutcome::Detached;
        }

        let host_matrix = match parse_projection(raw_matrix) {
            Ok(matrix) => matrix,
            Err(e) => {
                // Never fall back to an older matrix.
                self.view_proj = None;
                tracing::debug!(error = %e, "skipping frame");
                return FrameOutcome::Skipped(SkipReason::InvalidMatrix);
            }
        };

        if !self.sync_context(host.gpu(), registry) {
            tracing::debug!("skipping frame, gpu context lost");
            return FrameOutcome::Skipped(SkipReason::ContextLost);
        }

        let view_proj = host_matrix * self.correction.matrix();
        self.view_proj = Some(view_proj);

        let gpu = host.gpu();
        gpu.reset_state();
        registry.animate(dt, damping);
        registry.draw(gpu, &view_proj);

        let repaint = registry.is_animating();
        if repaint {
            host.request_repaint();
        }
        FrameOutcome::Drawn {
            objects: registry.len(),
            repaint,
        }
    }

    pub fn on_resize<H: MapHost + ?Sized>(&mut self, host: &mut H, width: u32, height: u32) {
        tracing::debug!(width, height, "viewport resized");
        host.gpu().set_viewport(width, height);
        host.request_repaint();
    }

    /// Unbind from the host. Scene objects are released by their owner.
    pub fn on_detach(&mut self) {
        self.attached = false;
        self.generation = None;
        self.last_frame = None;
        self.view_proj = None;
        tracing::info!("render bridge detached");
    }

    /// View-projection used by the most recent drawn frame.
    pub fn view_projection(&self) -> Option<Mat4> {
        self.view_proj
    }

    /// Entity under a point in normalized device coordinates.
    pub fn pick<'r>(&self, registry: &'r SceneObjectRegistry, ndc: Vec2) -> Option<&'r EntityId> {
        let inverse = self.view_proj?.inverse();
        let near = inverse.project_point3(ndc.extend(-1.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        if !near.is_finite() || !far.is_finite() {
            return None;
        }
        registry.pick(near, far - near)
    }
}

impl Default for RenderBridge {
    fn default() -> Self {
        Self::new(AxisCorrection::default())
    }
}
