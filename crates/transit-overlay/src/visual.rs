//! Procedural vehicle model and its per-frame micro-animations.
//!
//! Each visual owns a fixed set of GPU resources (5 meshes, 7 materials,
//! 2 labels) allocated once in [`EntityVisual::build`]. Appearance changes
//! afterwards rewrite those resources in place.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use glam::{Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::Result;
use crate::gpu::{
    DrawCall, GpuContext, LabelDesc, LabelHandle, MaterialDesc, MaterialHandle, MeshHandle,
};
use crate::mesh;

/// Peak vertical offset of the selection bob, in scene units.
pub const BOB_AMPLITUDE: f32 = 0.6;
/// Angular frequency of the selection bob (rad/s).
pub const BOB_FREQUENCY: f32 = 4.0;
/// One full bob cycle, in seconds. The animation clock wraps at this period.
const BOB_PERIOD: f32 = TAU / BOB_FREQUENCY;
/// Wheel rotation rate while moving (rad/s).
pub const WHEEL_SPIN_RATE: f32 = 8.0;
/// Scale target while selected.
pub const SELECTED_SCALE: f32 = 1.3;
/// Scale target while hovered.
pub const HOVERED_SCALE: f32 = 1.15;
/// Fraction of the remaining scale gap closed per frame.
pub const SCALE_EASE_PER_FRAME: f32 = 0.1;
/// Frame rate at which both damping laws agree.
const REFERENCE_FRAME_RATE: f32 = 60.0;
/// Scale gap below which the ease snaps to its target.
const SETTLE_EPSILON: f32 = 1e-3;

/// Radius of the sphere used for pointer picking, at scale 1.
pub const PICK_RADIUS: f32 = 6.5;

/// Half extents of the bus body (width, height, length).
const BODY_HALF: Vec3 = Vec3::new(1.25, 1.0, 6.0);
const BODY_CENTER_Y: f32 = 1.5;
const CABIN_HALF: Vec3 = Vec3::new(1.1, 0.3, 5.4);
const WHEEL_RADIUS: f32 = 0.5;
const WHEEL_HALF_WIDTH: f32 = 0.2;
const WINDOWS_PER_SIDE: usize = 4;
/// Probability that a passenger window is lit.
const WINDOW_LIT_CHANCE: f64 = 0.6;
const TITLE_HEIGHT: f32 = 4.4;
const SUBTITLE_HEIGHT: f32 = 3.7;

// Mesh slots.
const MESH_BODY: usize = 0;
const MESH_CABIN: usize = 1;
const MESH_WINDOW: usize = 2;
const MESH_WHEEL: usize = 3;
const MESH_LAMP: usize = 4;

// Material slots.
const MAT_BODY: usize = 0;
const MAT_CABIN: usize = 1;
const MAT_WINDOW_LIT: usize = 2;
const MAT_WINDOW_DARK: usize = 3;
const MAT_TIRE: usize = 4;
const MAT_HEADLIGHT: usize = 5;
const MAT_TAILLIGHT: usize = 6;

/// How the hover/selection scale eases toward its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDamping {
    /// Close a fixed fraction of the gap every frame, whatever its length.
    /// Converges faster at higher frame rates.
    PerFrame,
    /// Close the gap at a rate equivalent to `PerFrame` at 60 fps.
    #[default]
    TimeScaled,
}

impl ScaleDamping {
    /// Fraction of the remaining gap to close this frame.
    pub fn blend_factor(self, dt: f32) -> f32 {
        match self {
            ScaleDamping::PerFrame => SCALE_EASE_PER_FRAME,
            ScaleDamping::TimeScaled => {
                let frames = dt.max(0.0) * REFERENCE_FRAME_RATE;
                1.0 - (1.0 - SCALE_EASE_PER_FRAME).powf(frames)
            }
        }
    }
}

/// Interaction and motion flags that drive micro-animation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisualState {
    pub moving: bool,
    pub selected: bool,
    pub hovered: bool,
}

impl VisualState {
    /// Scale the visual eases toward.
    pub fn target_scale(self) -> f32 {
        if self.selected {
            SELECTED_SCALE
        } else if self.hovered {
            HOVERED_SCALE
        } else {
            1.0
        }
    }
}

/// Parameters of a visual.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualSpec {
    pub color: Color,
    /// Upper label, usually the vehicle's own label.
    pub title: String,
    /// Lower label, usually the route name.
    pub subtitle: String,
    /// Seed for decoration (window lighting).
    pub seed: u64,
}

/// One drawable piece of the vehicle.
#[derive(Debug, Clone, Copy)]
struct Part {
    mesh: usize,
    material: usize,
    offset: Mat4,
    /// Wheels rotate about their local X axis.
    spins: bool,
}

/// GPU resources owned by one visual.
#[derive(Debug, Default)]
struct VisualResources {
    meshes: Vec<MeshHandle>,
    materials: Vec<MaterialHandle>,
    labels: Vec<LabelHandle>,
}

impl VisualResources {
    fn allocate<G: GpuContext + ?Sized>(gpu: &mut G, spec: &VisualSpec) -> Result<Self> {
        let mut resources = Self::default();
        match resources.fill(gpu, spec) {
            Ok(()) => Ok(resources),
            Err(e) => {
                // Release whatever was allocated before the failure.
                resources.dispose(gpu);
                Err(e)
            }
        }
    }

    fn fill<G: GpuContext + ?Sized>(&mut self, gpu: &mut G, spec: &VisualSpec) -> Result<()> {
        for data in [
            mesh::cuboid(BODY_HALF),
            mesh::cuboid(CABIN_HALF),
            mesh::quad(2.2, 1.0),
            mesh::cylinder(WHEEL_RADIUS, WHEEL_HALF_WIDTH, 16),
            mesh::quad(0.5, 0.3),
        ] {
            self.meshes.push(gpu.create_mesh(&data)?);
        }

        for desc in material_descs(spec.color) {
            self.materials.push(gpu.create_material(&desc)?);
        }

        for desc in label_descs(spec) {
            self.labels.push(gpu.create_label(&desc)?);
        }
        Ok(())
    }

    fn dispose<G: GpuContext + ?Sized>(self, gpu: &mut G) {
        for mesh in self.meshes {
            gpu.destroy_mesh(mesh);
        }
        for material in self.materials {
            gpu.destroy_material(material);
        }
        for label in self.labels {
            gpu.destroy_label(label);
        }
    }

    fn count(&self) -> usize {
        self.meshes.len() + self.materials.len() + self.labels.len()
    }
}

fn material_descs(color: Color) -> [MaterialDesc; 7] {
    [
        MaterialDesc::opaque(color),
        MaterialDesc::opaque(color.lighten(0.35)),
        MaterialDesc::glowing(Color::rgb(1.0, 0.92, 0.6), 0.8),
        MaterialDesc {
            color: Color::rgb(0.12, 0.16, 0.22),
            emissive: 0.0,
            opacity: 0.85,
        },
        MaterialDesc::opaque(Color::rgb(0.08, 0.08, 0.08)),
        MaterialDesc::glowing(Color::rgb(1.0, 1.0, 0.85), 1.0),
        MaterialDesc::glowing(Color::rgb(0.9, 0.1, 0.1), 0.7),
    ]
}

fn label_descs(spec: &VisualSpec) -> [LabelDesc; 2] {
    [
        LabelDesc {
            text: spec.title.clone(),
            color: Color::WHITE,
            size_px: 14.0,
        },
        LabelDesc {
            text: spec.subtitle.clone(),
            color: Color::rgb(0.85, 0.85, 0.85),
            size_px: 11.0,
        },
    ]
}

/// Assemble the part hierarchy. `lit` holds one flag per passenger window.
fn assemble_parts(lit: &[bool]) -> Vec<Part> {
    let part = |mesh, material, offset| Part {
        mesh,
        material,
        offset,
        spins: false,
    };
    let mut parts = vec![
        part(
            MESH_BODY,
            MAT_BODY,
            Mat4::from_translation(Vec3::Y * BODY_CENTER_Y),
        ),
        part(
            MESH_CABIN,
            MAT_CABIN,
            Mat4::from_translation(Vec3::Y * (BODY_CENTER_Y + BODY_HALF.y + CABIN_HALF.y)),
        ),
        // Windshield faces forward (-Z).
        part(
            MESH_WINDOW,
            MAT_WINDOW_DARK,
            Mat4::from_rotation_translation(
                Quat::from_rotation_y(PI),
                Vec3::new(0.0, BODY_CENTER_Y + 0.3, -BODY_HALF.z - 0.01),
            ),
        ),
    ];

    // Passenger windows along both sides.
    let spacing = (BODY_HALF.z * 2.0 - 2.0) / WINDOWS_PER_SIDE as f32;
    for (i, lit) in lit.iter().enumerate() {
        let side = if i < WINDOWS_PER_SIDE { 1.0 } else { -1.0 };
        let slot = (i % WINDOWS_PER_SIDE) as f32;
        let z = -BODY_HALF.z + 1.0 + spacing * (slot + 0.5);
        parts.push(Part {
            mesh: MESH_WINDOW,
            material: if *lit { MAT_WINDOW_LIT } else { MAT_WINDOW_DARK },
            offset: Mat4::from_rotation_translation(
                Quat::from_rotation_y(FRAC_PI_2 * side),
                Vec3::new((BODY_HALF.x + 0.01) * side, BODY_CENTER_Y + 0.4, z),
            )
            * Mat4::from_scale(Vec3::new(spacing * 0.8 / 2.2, 1.0, 1.0)),
            spins: false,
        });
    }

    // Two wheel pairs.
    for z in [-BODY_HALF.z + 1.8, BODY_HALF.z - 1.8] {
        for x in [-(BODY_HALF.x - 0.1), BODY_HALF.x - 0.1] {
            parts.push(Part {
                mesh: MESH_WHEEL,
                material: MAT_TIRE,
                offset: Mat4::from_translation(Vec3::new(x, WHEEL_RADIUS, z)),
                spins: true,
            });
        }
    }

    // Headlights forward, taillights aft.
    for x in [-0.8, 0.8] {
        parts.push(part(
            MESH_LAMP,
            MAT_HEADLIGHT,
            Mat4::from_rotation_translation(
                Quat::from_rotation_y(PI),
                Vec3::new(x, 1.0, -BODY_HALF.z - 0.02),
            ),
        ));
        parts.push(part(
            MESH_LAMP,
            MAT_TAILLIGHT,
            Mat4::from_translation(Vec3::new(x, 1.0, BODY_HALF.z + 0.02)),
        ));
    }
    parts
}

/// Deterministic window lighting pattern for a seed.
pub fn window_pattern(seed: u64) -> Vec<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..WINDOWS_PER_SIDE * 2)
        .map(|_| rng.random_bool(WINDOW_LIT_CHANCE))
        .collect()
}

/// The 3D representation of one vehicle.
#[derive(Debug)]
pub struct EntityVisual {
    resources: VisualResources,
    parts: Vec<Part>,
    spec: VisualSpec,
    elapsed: f32,
    wheel_angle: f32,
    bob: f32,
    scale: f32,
}

impl EntityVisual {
    /// Allocate GPU resources and assemble the part hierarchy.
    pub fn build<G: GpuContext + ?Sized>(gpu: &mut G, spec: VisualSpec) -> Result<Self> {
        let resources = VisualResources::allocate(gpu, &spec)?;
        let parts = assemble_parts(&window_pattern(spec.seed));
        Ok(Self {
            resources,
            parts,
            spec,
            elapsed: 0.0,
            wheel_angle: 0.0,
            bob: 0.0,
            scale: 1.0,
        })
    }

    /// Apply color and label changes by rewriting existing resources.
    pub fn set_appearance<G: GpuContext + ?Sized>(
        &mut self,
        gpu: &mut G,
        color: Color,
        title: &str,
        subtitle: &str,
    ) {
        if color != self.spec.color {
            self.spec.color = color;
            let descs = material_descs(color);
            for slot in [MAT_BODY, MAT_CABIN] {
                gpu.update_material(self.resources.materials[slot], &descs[slot]);
            }
        }

        if title != self.spec.title || subtitle != self.spec.subtitle {
            self.spec.title = title.to_string();
            self.spec.subtitle = subtitle.to_string();
            for (label, desc) in self.resources.labels.iter().zip(label_descs(&self.spec)) {
                gpu.update_label(*label, &desc);
            }
        }
    }

    /// Reallocate resources after the GPU context was lost.
    ///
    /// The old handles died with the context and are not destroyed.
    /// Animation state is kept.
    pub fn rebuild<G: GpuContext + ?Sized>(&mut self, gpu: &mut G) -> Result<()> {
        self.resources = VisualResources::allocate(gpu, &self.spec)?;
        Ok(())
    }

    /// Advance micro-animations by `dt` seconds.
    pub fn animate(&mut self, dt: f32, state: VisualState, damping: ScaleDamping) {
        let dt = dt.max(0.0);
        self.elapsed = (self.elapsed + dt) % BOB_PERIOD;

        if state.moving {
            self.wheel_angle = (self.wheel_angle + WHEEL_SPIN_RATE * dt) % TAU;
        }

        self.bob = if state.selected {
            (self.elapsed * BOB_FREQUENCY).sin() * BOB_AMPLITUDE
        } else {
            0.0
        };

        let target = state.target_scale();
        self.scale += (target - self.scale) * damping.blend_factor(dt);
        if (target - self.scale).abs() < SETTLE_EPSILON {
            self.scale = target;
        }
    }

    /// Whether further frames would change nothing.
    pub fn is_settled(&self, state: VisualState) -> bool {
        !state.moving && !state.selected && self.scale == state.target_scale()
    }

    /// Draw every part under the given root transform.
    pub fn draw<G: GpuContext + ?Sized>(&self, gpu: &mut G, view_proj: &Mat4, root: Mat4) {
        let lifted = root * Mat4::from_translation(Vec3::Y * self.bob) * Mat4::from_scale(Vec3::splat(self.scale));
        let spin = Mat4::from_rotation_x(self.wheel_angle);

        for part in &self.parts {
            let mut model = lifted * part.offset;
            if part.spins {
                model *= spin;
            }
            gpu.draw_mesh(
                view_proj,
                &DrawCall {
                    mesh: self.resources.meshes[part.mesh],
                    material: self.resources.materials[part.material],
                    model,
                },
            );
        }

        for (label, height) in self
            .resources
            .labels
            .iter()
            .zip([TITLE_HEIGHT, SUBTITLE_HEIGHT])
        {
            let anchor = lifted.transform_point3(Vec3::Y * height);
            gpu.draw_label(view_proj, *label, anchor);
        }
    }

    /// Release every GPU resource.
    pub fn dispose<G: GpuContext + ?Sized>(self, gpu: &mut G) {
        self.resources.dispose(gpu);
    }

    /// Number of GPU resources held.
    pub fn resource_count(&self) -> usize {
        self.resources.count()
    }

    /// Number of mesh draws per frame.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn bob_offset(&self) -> f32 {
        self.bob
    }

    pub fn wheel_angle(&self) -> f32 {
        self.wheel_angle
    }

    pub fn spec(&self) -> &VisualSpec {
        &self.spec
    }

    /// Picking radius at the current scale.
    pub fn pick_radius(&self) -> f32 {
        PICK_RADIUS * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gpu::HeadlessGpu;

    fn spec() -> VisualSpec {
        VisualSpec {
            color: Color::DEFAULT_VEHICLE,
            title: "29B-123.45".to_string(),
            subtitle: "Hà Nội – Hải Phòng".to_string(),
            seed: 7,
        }
    }

    #[test]
    fn test_build_and_dispose() {
        let mut gpu = HeadlessGpu::new();
        let visual = EntityVisual::build(&mut gpu, spec()).unwrap();
        assert_eq!(visual.resource_count(), 5 + 7 + 2);
        assert_eq!(gpu.live_resources(), visual.resource_count());
        assert_eq!(gpu.live_labels(), 2);

        visual.dispose(&mut gpu);
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn test_build_failure_leaks_nothing() {
        let mut gpu = HeadlessGpu::new();
        gpu.lose_context();
        let result = EntityVisual::build(&mut gpu, spec());
        assert!(matches!(result, Err(Error::ContextLost)));
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn test_part_hierarchy() {
        let mut gpu = HeadlessGpu::new();
        let visual = EntityVisual::build(&mut gpu, spec()).unwrap();
        // Body, cabin, windshield, side windows, four wheels, four lamps.
        assert_eq!(visual.part_count(), 3 + WINDOWS_PER_SIDE * 2 + 4 + 4);

        let view_proj = Mat4::IDENTITY;
        visual.draw(&mut gpu, &view_proj, Mat4::IDENTITY);
        assert_eq!(gpu.draw_calls(), visual.part_count() as u64);
        assert_eq!(gpu.label_draws(), 2);
    }

    #[test]
    fn test_window_pattern_is_seeded() {
        assert_eq!(window_pattern(42), window_pattern(42));
        assert_eq!(window_pattern(42).len(), WINDOWS_PER_SIDE * 2);
        // Some seed in a small range must differ from seed 0.
        assert!((1..16).any(|s| window_pattern(s) != window_pattern(0)));
    }

    #[test]
    fn test_appearance_updates_do_not_allocate() {
        let mut gpu = HeadlessGpu::new();
        let mut visual = EntityVisual::build(&mut gpu, spec()).unwrap();
        let allocations = gpu.allocations();

        visual.set_appearance(&mut gpu, Color::WHITE, "new label", "Hà Nội – Hạ Long");
        assert_eq!(gpu.allocations(), allocations);
        assert_eq!(gpu.updates(), 2 + 2);

        // Unchanged appearance touches nothing.
        visual.set_appearance(&mut gpu, Color::WHITE, "new label", "Hà Nội – Hạ Long");
        assert_eq!(gpu.updates(), 4);
    }

    #[test]
    fn test_wheels_spin_only_when_moving() {
        let mut gpu = HeadlessGpu::new();
        let mut visual = EntityVisual::build(&mut gpu, spec()).unwrap();

        visual.animate(0.1, VisualState::default(), ScaleDamping::TimeScaled);
        assert_eq!(visual.wheel_angle(), 0.0);

        let moving = VisualState {
            moving: true,
            ..Default::default()
        };
        visual.animate(0.1, moving, ScaleDamping::TimeScaled);
        assert!((visual.wheel_angle() - WHEEL_SPIN_RATE * 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_bob_only_when_selected() {
        let mut gpu = HeadlessGpu::new();
        let mut visual = EntityVisual::build(&mut gpu, spec()).unwrap();
        let selected = VisualState {
            selected: true,
            ..Default::default()
        };

        visual.animate(0.3, selected, ScaleDamping::TimeScaled);
        let expected = (0.3 * BOB_FREQUENCY).sin() * BOB_AMPLITUDE;
        assert!((visual.bob_offset() - expected).abs() < 1e-5);

        visual.animate(0.3, VisualState::default(), ScaleDamping::TimeScaled);
        assert_eq!(visual.bob_offset(), 0.0);
    }

    #[test]
    fn test_bob_clock_stays_bounded() {
        let mut gpu = HeadlessGpu::new();
        let mut visual = EntityVisual::build(&mut gpu, spec()).unwrap();
        let selected = VisualState {
            selected: true,
            ..Default::default()
        };

        // Ten hours of selection.
        for _ in 0..10 {
            visual.animate(3600.0, selected, ScaleDamping::TimeScaled);
        }
        assert!((0.0..BOB_PERIOD).contains(&visual.elapsed));

        // Phase stays accurate for small steps after a long run.
        let start = visual.elapsed;
        visual.animate(0.1, selected, ScaleDamping::TimeScaled);
        let expected = ((start + 0.1) % BOB_PERIOD * BOB_FREQUENCY).sin() * BOB_AMPLITUDE;
        assert!((visual.bob_offset() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_scale_eases_and_settles() {
        let mut gpu = HeadlessGpu::new();
        let mut visual = EntityVisual::build(&mut gpu, spec()).unwrap();
        let hovered = VisualState {
            hovered: true,
            ..Default::default()
        };

        visual.animate(1.0 / 60.0, hovered, ScaleDamping::PerFrame);
        let first = visual.scale();
        assert!((first - (1.0 + (HOVERED_SCALE - 1.0) * SCALE_EASE_PER_FRAME)).abs() < 1e-5);
        assert!(!visual.is_settled(hovered));

        for _ in 0..200 {
            visual.animate(1.0 / 60.0, hovered, ScaleDamping::PerFrame);
        }
        assert_eq!(visual.scale(), HOVERED_SCALE);
        assert!(!visual.is_settled(VisualState::default()));
    }

    #[test]
    fn test_time_scaled_damping_is_frame_rate_independent() {
        let run = |fps: f32| {
            let mut gpu = HeadlessGpu::new();
            let mut visual = EntityVisual::build(&mut gpu, spec()).unwrap();
            let hovered = VisualState {
                hovered: true,
                ..Default::default()
            };
            let frames = (fps * 0.25) as usize;
            for _ in 0..frames {
                visual.animate(1.0 / fps, hovered, ScaleDamping::TimeScaled);
            }
            visual.scale()
        };
        assert!((run(40.0) - run(120.0)).abs() < 1e-3);
    }

    #[test]
    fn test_damping_laws_agree_at_reference_rate() {
        let per_frame = ScaleDamping::PerFrame.blend_factor(1.0 / 60.0);
        let scaled = ScaleDamping::TimeScaled.blend_factor(1.0 / 60.0);
        assert!((per_frame - scaled).abs() < 1e-5);
        assert_eq!(ScaleDamping::TimeScaled.blend_factor(0.0), 0.0);
    }
}
