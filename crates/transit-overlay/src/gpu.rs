//! GPU resource abstraction shared with the host map renderer.
//!
//! The overlay never owns the GPU context: the host does. Everything the
//! overlay allocates goes through [`GpuContext`], which makes the allocation
//! discipline (one creation, one disposal) observable.
//!
//! # Implementations
//!
//! - [`HeadlessGpu`]: keeps no pixels, only resource bookkeeping and draw
//!   counts. Used by the in-process host and tests.

use std::collections::HashSet;

use glam::{Mat4, Vec3};

use crate::color::Color;
use crate::error::{Error, Result};
use crate::mesh::MeshData;

/// Handle to an uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u64);

/// Handle to a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u64);

/// Handle to a rendered text label texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelHandle(pub u64);

/// Surface parameters of a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialDesc {
    pub color: Color,
    /// Self-illumination in `0.0..=1.0`.
    pub emissive: f32,
    pub opacity: f32,
}

impl MaterialDesc {
    pub const fn opaque(color: Color) -> Self {
        Self {
            color,
            emissive: 0.0,
            opacity: 1.0,
        }
    }

    pub const fn glowing(color: Color, emissive: f32) -> Self {
        Self {
            color,
            emissive,
            opacity: 1.0,
        }
    }
}

/// Contents of a text label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDesc {
    pub text: String,
    pub color: Color,
    /// Glyph height in pixels.
    pub size_px: f32,
}

/// Scene lighting installed once per context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    pub ambient_color: Color,
    pub ambient_intensity: f32,
    /// Direction the sunlight travels, in the local frame.
    pub sun_direction: Vec3,
    pub sun_color: Color,
    pub sun_intensity: f32,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            ambient_color: Color::WHITE,
            ambient_intensity: 0.6,
            sun_direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            sun_color: Color::rgb(1.0, 0.97, 0.9),
            sun_intensity: 0.9,
        }
    }
}

/// One mesh draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    /// Local-to-scene transform.
    pub model: Mat4,
}

/// Resource and draw interface onto a GPU context shared with the host.
///
/// Creation fails with [`Error::ContextLost`] while the context is lost.
/// Handles from a previous context generation are dead and must not be
/// destroyed; they are simply forgotten and recreated.
pub trait GpuContext {
    fn create_mesh(&mut self, data: &MeshData) -> Result<MeshHandle>;
    fn destroy_mesh(&mut self, mesh: MeshHandle);

    fn create_material(&mut self, desc: &MaterialDesc) -> Result<MaterialHandle>;
    /// Rewrite a material in place. Never allocates.
    fn update_material(&mut self, material: MaterialHandle, desc: &MaterialDesc);
    fn destroy_material(&mut self, material: MaterialHandle);

    fn create_label(&mut self, desc: &LabelDesc) -> Result<LabelHandle>;
    /// Re-render a label into its existing texture. Never allocates.
    fn update_label(&mut self, label: LabelHandle, desc: &LabelDesc);
    fn destroy_label(&mut self, label: LabelHandle);

    fn set_lighting(&mut self, lighting: &Lighting);

    /// Reset cached pipeline state; the host may have left it dirty.
    fn reset_state(&mut self);

    fn set_viewport(&mut self, width: u32, height: u32);

    fn draw_mesh(&mut self, view_proj: &Mat4, call: &DrawCall);

    /// Draw a camera-facing label anchored at a scene position.
    fn draw_label(&mut self, view_proj: &Mat4, label: LabelHandle, anchor: Vec3);

    /// Whether the context is currently lost.
    fn is_lost(&self) -> bool;

    /// Incremented every time the context is restored after a loss.
    fn generation(&self) -> u64;
}

/// A [`GpuContext`] that tracks resources without rendering anything.
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    next_id: u64,
    meshes: HashSet<u64>,
    materials: HashSet<u64>,
    labels: HashSet<u64>,
    allocations: u64,
    updates: u64,
    draw_calls: u64,
    label_draws: u64,
    state_resets: u64,
    lighting: Option<Lighting>,
    viewport: (u32, u32),
    lost: bool,
    generation: u64,
    /// Upcoming allocations to refuse.
    failing: usize,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, kind: &'static str) -> Result<u64> {
        if self.lost {
            return Err(Error::ContextLost);
        }
        if self.failing > 0 {
            self.failing -= 1;
            return Err(Error::AllocationFailed { resource: kind });
        }
        self.next_id += 1;
        self.allocations += 1;
        Ok(self.next_id)
    }

    /// Refuse the next `count` allocations, as an out-of-memory driver would.
    pub fn fail_next_allocations(&mut self, count: usize) {
        self.failing = count;
    }

    /// Simulate context loss: every resource is gone.
    pub fn lose_context(&mut self) {
        self.lost = true;
        self.meshes.clear();
        self.materials.clear();
        self.labels.clear();
        self.lighting = None;
    }

    /// Simulate context restoration.
    pub fn restore_context(&mut self) {
        if self.lost {
            self.lost = false;
            self.generation += 1;
        }
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn live_materials(&self) -> usize {
        self.materials.len()
    }

    pub fn live_labels(&self) -> usize {
        self.labels.len()
    }

    /// Live resources of every kind.
    pub fn live_resources(&self) -> usize {
        self.live_meshes() + self.live_materials() + self.live_labels()
    }

    /// Total allocations since creation, including freed ones.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Total in-place material and label rewrites.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn label_draws(&self) -> u64 {
        self.label_draws
    }

    pub fn state_resets(&self) -> u64 {
        self.state_resets
    }

    pub fn lighting(&self) -> Option<&Lighting> {
        self.lighting.as_ref()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }
}

/// Remove a handle from a live set, logging handles that were never live.
fn release(set: &mut HashSet<u64>, id: u64, kind: &'static str, lost: bool) {
    if !set.remove(&id) && !lost {
        tracing::warn!(kind, id, "destroying unknown gpu resource");
    }
}

impl GpuContext for HeadlessGpu {
    fn create_mesh(&mut self, _data: &MeshData) -> Result<MeshHandle> {
        let id = self.allocate("mesh")?;
        self.meshes.insert(id);
        Ok(MeshHandle(id))
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        release(&mut self.meshes, mesh.0, "mesh", self.lost);
    }

    fn create_material(&mut self, _desc: &MaterialDesc) -> Result<MaterialHandle> {
        let id = self.allocate("material")?;
        self.materials.insert(id);
        Ok(MaterialHandle(id))
    }

    fn update_material(&mut self, _material: MaterialHandle, _desc: &MaterialDesc) {
        self.updates += 1;
    }

    fn destroy_material(&mut self, material: MaterialHandle) {
        release(&mut self.materials, material.0, "material", self.lost);
    }

    fn create_label(&mut self, _desc: &LabelDesc) -> Result<LabelHandle> {
        let id = self.allocate("label")?;
        self.labels.insert(id);
        Ok(LabelHandle(id))
    }

    fn update_label(&mut self, _label: LabelHandle, _desc: &LabelDesc) {
        self.updates += 1;
    }

    fn destroy_label(&mut self, label: LabelHandle) {
        release(&mut self.labels, label.0, "label", self.lost);
    }

    fn set_lighting(&mut self, lighting: &Lighting) {
        self.lighting = Some(*lighting);
    }

    fn reset_state(&mut self) {
        self.state_resets += 1;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn draw_mesh(&mut self, _view_proj: &Mat4, _call: &DrawCall) {
        self.draw_calls += 1;
    }

    fn draw_label(&mut self, _view_proj: &Mat4, _label: LabelHandle, _anchor: Vec3) {
        self.label_draws += 1;
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}
