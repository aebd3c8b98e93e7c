//! Procedural mesh generation for vehicle parts.
//!
//! Produces flat-shaded triangle lists (positions, normals, indices) ready to
//! upload through [`crate::gpu::GpuContext::create_mesh`].

use glam::Vec3;

/// CPU-side mesh data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Append a quad with the given corners (counter-clockwise seen from `normal`).
    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3) {
        let base = self.positions.len() as u32;
        for corner in corners {
            self.positions.push(corner.to_array());
            self.normals.push(normal.to_array());
        }
        self.indices
            .extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Axis-aligned box centered on the origin.
pub fn cuboid(half_extents: Vec3) -> MeshData {
    let h = half_extents;
    let mut mesh = MeshData::default();

    // One quad per face, four vertices each so normals stay flat.
    // (normal, up, right) with right × up == normal.
    let faces = [
        (Vec3::X, Vec3::Y, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Y, Vec3::Z),
        (Vec3::Y, Vec3::NEG_Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::Z, Vec3::X),
        (Vec3::Z, Vec3::Y, Vec3::X),
        (Vec3::NEG_Z, Vec3::Y, Vec3::NEG_X),
    ];
    for (normal, up, right) in faces {
        let center = normal * h;
        let u = right * h;
        let v = up * h;
        mesh.push_quad(
            [center - u - v, center + u - v, center + u + v, center - u + v],
            normal,
        );
    }
    mesh
}

/// Cylinder along the X axis, centered on the origin.
///
/// Wheels are built this way so that spinning them is a rotation about X.
pub fn cylinder(radius: f32, half_length: f32, segments: u32) -> MeshData {
    let segments = segments.max(3);
    let mut mesh = MeshData::default();
    let step = std::f32::consts::TAU / segments as f32;
    let ring = |i: u32| {
        let angle = step * i as f32;
        Vec3::new(0.0, angle.cos() * radius, angle.sin() * radius)
    };

    // Side wall.
    for i in 0..segments {
        let a = ring(i);
        let b = ring(i + 1);
        let normal = ((a + b) * 0.5).normalize_or_zero();
        let left = Vec3::X * -half_length;
        let right = Vec3::X * half_length;
        mesh.push_quad([a + left, b + left, b + right, a + right], normal);
    }

    // Caps as triangle fans.
    for (x, normal) in [(half_length, Vec3::X), (-half_length, Vec3::NEG_X)] {
        let center_index = mesh.positions.len() as u32;
        mesh.positions.push([x, 0.0, 0.0]);
        mesh.normals.push(normal.to_array());
        for i in 0..segments {
            let p = ring(i) + Vec3::X * x;
            mesh.positions.push(p.to_array());
            mesh.normals.push(normal.to_array());
        }
        for i in 0..segments {
            let a = center_index + 1 + i;
            let b = center_index + 1 + (i + 1) % segments;
            if x > 0.0 {
                mesh.indices.extend([center_index, a, b]);
            } else {
                mesh.indices.extend([center_index, b, a]);
            }
        }
    }
    mesh
}

/// Flat rectangle in the XY plane facing +Z.
pub fn quad(width: f32, height: f32) -> MeshData {
    let (hw, hh) = (width * 0.5, height * 0.5);
    let mut mesh = MeshData::default();
    mesh.push_quad(
        [
            Vec3::new(-hw, -hh, 0.0),
            Vec3::new(hw, -hh, 0.0),
            Vec3::new(hw, hh, 0.0),
            Vec3::new(-hw, hh, 0.0),
        ],
        Vec3::Z,
    );
    mesh
}
