//! Scene description handed to the energy map renderer.
//!
//! Coordinates are camera coordinates: the sensor sits at the origin looking
//! down -Z with +Y up. The scene is a flat list of triangle patches; target
//! patches additionally follow the target pose.

use glam::{Mat4, Quat, Vec3};

use crate::target::Target;

/// Target position used when no animation drives the pose.
pub const HOME_TARGET_POSITION: Vec3 = Vec3::new(0.0, 0.0, -1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchRole {
    /// Fixed relative to the camera.
    Background,
    /// Moves with the target pose.
    Target,
}

/// Indexed triangles with per-vertex normals, counter-clockwise front faces.
#[derive(Debug, Clone)]
pub struct GeometryPatch {
    pub role: PatchRole,
    /// Patch-local to target (or camera) coordinates.
    pub transform: Mat4,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl GeometryPatch {
    pub fn new(role: PatchRole, transform: Mat4) -> Self {
        Self {
            role,
            transform,
            positions: Vec::new(),
            normals: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn push_polygon(&mut self, corners: &[Vec3]) {
        let normal = (corners[1] - corners[0])
            .cross(corners[2] - corners[0])
            .normalize_or_zero();
        let base = self.positions.len() as u32;
        for c in corners {
            self.positions.push(*c);
            self.normals.push(normal);
        }
        for i in 1..corners.len() as u32 - 1 {
            self.indices.extend_from_slice(&[base, base + i, base + i + 1]);
        }
    }

    /// Double-sided triangle.
    pub fn add_triangle(&mut self, v: [Vec3; 3]) {
        self.push_polygon(&v);
        self.push_polygon(&[v[0], v[2], v[1]]);
    }

    /// Double-sided planar quad, corners in order.
    pub fn add_quad(&mut self, v: [Vec3; 4]) {
        self.push_polygon(&v);
        self.push_polygon(&[v[0], v[3], v[2], v[1]]);
    }

    /// Closed axis-aligned box centered at the origin, faces pointing out.
    pub fn add_box(&mut self, size: Vec3) {
        let h = size / 2.0;
        let c = |x: f32, y: f32, z: f32| Vec3::new(x * h.x, y * h.y, z * h.z);
        let faces = [
            [c(-1., -1., 1.), c(1., -1., 1.), c(1., 1., 1.), c(-1., 1., 1.)],
            [c(1., -1., -1.), c(-1., -1., -1.), c(-1., 1., -1.), c(1., 1., -1.)],
            [c(-1., 1., 1.), c(1., 1., 1.), c(1., 1., -1.), c(-1., 1., -1.)],
            [c(-1., -1., -1.), c(1., -1., -1.), c(1., -1., 1.), c(-1., -1., 1.)],
            [c(1., -1., 1.), c(1., -1., -1.), c(1., 1., -1.), c(1., 1., 1.)],
            [c(-1., -1., -1.), c(-1., -1., 1.), c(-1., 1., 1.), c(-1., 1., -1.)],
        ];
        for face in &faces {
            self.push_polygon(face);
        }
    }
}

/// One triangle in camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
}

#[derive(Debug, Clone)]
pub struct Scene {
    patches: Vec<GeometryPatch>,
    target_pose: Mat4,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            patches: Vec::new(),
            target_pose: Mat4::IDENTITY,
        }
    }

    /// Fixed background plus pose-driven target, placed at
    /// [`HOME_TARGET_POSITION`].
    pub fn from_targets(background: &Target, target: &Target) -> Self {
        let mut scene = Self::new();
        scene.push(background.geometry(PatchRole::Background));
        scene.push(target.geometry(PatchRole::Target));
        scene.set_target_pose(HOME_TARGET_POSITION, Quat::IDENTITY);
        scene
    }

    pub fn push(&mut self, patch: GeometryPatch) {
        self.patches.push(patch);
    }

    pub fn patches(&self) -> &[GeometryPatch] {
        &self.patches
    }

    pub fn set_target_pose(&mut self, pos: Vec3, rot: Quat) {
        self.target_pose = Mat4::from_rotation_translation(rot, pos);
    }

    pub fn target_pose(&self) -> Mat4 {
        self.target_pose
    }

    pub fn world_transform(&self, patch: &GeometryPatch) -> Mat4 {
        match patch.role {
            PatchRole::Background => patch.transform,
            PatchRole::Target => self.target_pose * patch.transform,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.patches.iter().map(|p| p.triangle_count()).sum()
    }

    /// Every triangle transformed into camera coordinates.
    pub fn triangles(&self) -> Vec<Triangle> {
        let mut out = Vec::with_capacity(self.triangle_count());
        for patch in &self.patches {
            let m = self.world_transform(patch);
            for tri in patch.indices.chunks_exact(3) {
                let p = |i: usize| m.transform_point3(patch.positions[tri[i] as usize]);
                let n = |i: usize| {
                    m.transform_vector3(patch.normals[tri[i] as usize])
                        .normalize_or_zero()
                };
                out.push(Triangle {
                    positions: [p(0), p(1), p(2)],
                    normals: [n(0), n(1), n(2)],
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_sided_quad_normals_oppose() {
        let mut patch = GeometryPatch::new(PatchRole::Background, Mat4::IDENTITY);
        patch.add_quad([
            Vec3::new(-1.0, -1.0, -2.0),
            Vec3::new(1.0, -1.0, -2.0),
            Vec3::new(1.0, 1.0, -2.0),
            Vec3::new(-1.0, 1.0, -2.0),
        ]);
        assert_eq!(patch.triangle_count(), 4);
        assert_eq!(patch.normals[0], Vec3::Z);
        assert_eq!(patch.normals[4], Vec3::NEG_Z);
    }

    #[test]
    fn test_box_faces_point_outward() {
        let mut patch = GeometryPatch::new(PatchRole::Target, Mat4::IDENTITY);
        patch.add_box(Vec3::ONE);
        for (p, n) in patch.positions.iter().zip(&patch.normals) {
            assert!(p.dot(*n) > 0.0);
        }
    }

    #[test]
    fn test_target_pose_moves_only_target() {
        let mut scene = Scene::new();
        let mut bg = GeometryPatch::new(PatchRole::Background, Mat4::IDENTITY);
        bg.add_triangle([Vec3::ZERO, Vec3::X, Vec3::Y]);
        let mut tg = GeometryPatch::new(PatchRole::Target, Mat4::IDENTITY);
        tg.add_triangle([Vec3::ZERO, Vec3::X, Vec3::Y]);
        scene.push(bg);
        scene.push(tg);
        scene.set_target_pose(Vec3::new(0.0, 0.0, -1.0), Quat::from_rotation_y(std::f32::consts::PI));

        let tris = scene.triangles();
        assert_eq!(tris.len(), 4);
        assert_eq!(tris[0].positions[0], Vec3::ZERO);
        assert_eq!(tris[2].positions[0], Vec3::new(0.0, 0.0, -1.0));
        assert!((tris[2].normals[0] - Vec3::NEG_Z).length() < 1e-6);
    }
}
