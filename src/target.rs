//! Target and background descriptions.
//!
//! A target file selects one of four variants and carries the parameters of
//! all of them:
//!
//! ```text
//! PMDSIM TARGET VERSION 1
//! variant 3
//! star_spokes 16
//! star_radius 0.25
//! ```
//!
//! Geometry is generated in target-local coordinates: the front of bar
//! patterns and stars is centered in the x/y plane at z=0 and extends toward
//! negative z.

use std::path::Path;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::scene::{GeometryPatch, PatchRole};
use crate::textfile::{self, quoted, set};

/// Size of the box standing in for model targets (meters, x/y/z).
pub const MODEL_FALLBACK_SIZE: Vec3 = Vec3::new(0.3, 0.2, 0.15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetVariant {
    Model,
    Bars,
    Star,
    BackgroundPlanar,
}

impl TargetVariant {
    pub fn code(self) -> u32 {
        match self {
            TargetVariant::Model => 1,
            TargetVariant::Bars => 2,
            TargetVariant::Star => 3,
            TargetVariant::BackgroundPlanar => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(TargetVariant::Model),
            2 => Some(TargetVariant::Bars),
            3 => Some(TargetVariant::Star),
            4 => Some(TargetVariant::BackgroundPlanar),
            _ => None,
        }
    }
}

/// Which side of the bar background plane is closest to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NearSide {
    Left,
    Top,
    Right,
    Bottom,
}

impl NearSide {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(NearSide::Left),
            1 => Some(NearSide::Top),
            2 => Some(NearSide::Right),
            3 => Some(NearSide::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub variant: TargetVariant,

    // Model
    pub model_filename: String,

    // Bar pattern; lengths in meters
    pub number_of_bars: u32,
    pub first_bar_width: f32,
    pub first_bar_height: f32,
    pub first_offset_x: f32,
    pub first_offset_y: f32,
    pub first_offset_z: f32,
    pub next_bar_width_factor: f32,
    pub next_bar_width_offset: f32,
    pub next_bar_height_factor: f32,
    pub next_bar_height_offset: f32,
    pub next_offset_x_factor: f32,
    pub next_offset_x_offset: f32,
    pub next_offset_y_factor: f32,
    pub next_offset_y_offset: f32,
    pub next_offset_z_factor: f32,
    pub next_offset_z_offset: f32,
    /// -1 disables the background, 0..=3 selects left/top/right/bottom as near side.
    pub bar_background_near_side: i32,
    pub bar_background_dist_near: f32,
    pub bar_background_dist_far: f32,
    /// Radians, about the viewing axis.
    pub bar_rotation: f32,

    // Siemens star
    pub star_spokes: u32,
    pub star_radius: f32,
    pub star_background_dist_center: f32,
    pub star_background_dist_rim: f32,

    // Planar background
    pub background_planar_width: f32,
    pub background_planar_height: f32,
    pub background_planar_dist: f32,
}

impl Default for Target {
    fn default() -> Self {
        Self::new(TargetVariant::Star)
    }
}

impl Target {
    pub fn new(variant: TargetVariant) -> Self {
        Self {
            variant,
            model_filename: String::new(),
            number_of_bars: 40,
            first_bar_width: 0.05,
            first_bar_height: 0.20,
            first_offset_x: 0.075,
            first_offset_y: 0.0,
            first_offset_z: 0.0,
            next_bar_width_factor: 0.75,
            next_bar_width_offset: 0.0,
            next_bar_height_factor: 1.0,
            next_bar_height_offset: 0.0,
            next_offset_x_factor: 0.75,
            next_offset_x_offset: 0.0,
            next_offset_y_factor: 1.0,
            next_offset_y_offset: 0.0,
            next_offset_z_factor: 1.0,
            next_offset_z_offset: 0.0,
            bar_background_near_side: 1,
            bar_background_dist_near: 0.0,
            bar_background_dist_far: 0.20,
            bar_rotation: 0.0,
            star_spokes: 20,
            star_radius: 0.20,
            star_background_dist_center: 0.20,
            star_background_dist_rim: 0.0,
            background_planar_width: 0.8,
            background_planar_height: 0.6,
            background_planar_dist: 0.0,
        }
    }

    /// The default background: a planar one, disabled until given a distance.
    pub fn planar_background() -> Self {
        Self::new(TargetVariant::BackgroundPlanar)
    }

    // ------------------------------------------------------------------------
    // File I/O
    // ------------------------------------------------------------------------

    pub fn parse_str(content: &str, source: &Path) -> Result<Self> {
        if textfile::header_version(content.lines().next(), "TARGET") != Some(1) {
            return Err(SimError::InvalidHeader {
                path: source.to_path_buf(),
                kind: "target",
            });
        }
        let mut target = Self::default();
        for (line_no, line) in textfile::content_lines(content) {
            let applied = textfile::key_value(line).is_some_and(|(k, v)| target.apply(k, v));
            if !applied {
                log::warn!("ignoring {} line {}", source.display(), line_no);
            }
        }
        Ok(target)
    }

    fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "variant" => match value.parse().ok().and_then(TargetVariant::from_code) {
                Some(v) => {
                    self.variant = v;
                    true
                }
                None => false,
            },
            "model_filename" => match quoted(value) {
                Some(name) => {
                    self.model_filename = name.to_string();
                    true
                }
                None => false,
            },
            "number_of_bars" => set(&mut self.number_of_bars, value),
            "first_bar_width" => set(&mut self.first_bar_width, value),
            "first_bar_height" => set(&mut self.first_bar_height, value),
            "first_offset_x" => set(&mut self.first_offset_x, value),
            "first_offset_y" => set(&mut self.first_offset_y, value),
            "first_offset_z" => set(&mut self.first_offset_z, value),
            "next_bar_width_factor" => set(&mut self.next_bar_width_factor, value),
            "next_bar_width_offset" => set(&mut self.next_bar_width_offset, value),
            "next_bar_height_factor" => set(&mut self.next_bar_height_factor, value),
            "next_bar_height_offset" => set(&mut self.next_bar_height_offset, value),
            "next_offset_x_factor" => set(&mut self.next_offset_x_factor, value),
            "next_offset_x_offset" => set(&mut self.next_offset_x_offset, value),
            "next_offset_y_factor" => set(&mut self.next_offset_y_factor, value),
            "next_offset_y_offset" => set(&mut self.next_offset_y_offset, value),
            "next_offset_z_factor" => set(&mut self.next_offset_z_factor, value),
            "next_offset_z_offset" => set(&mut self.next_offset_z_offset, value),
            "bar_background_near_side" => set(&mut self.bar_background_near_side, value),
            "bar_background_dist_near" => set(&mut self.bar_background_dist_near, value),
            "bar_background_dist_far" => set(&mut self.bar_background_dist_far, value),
            "bar_rotation" => set(&mut self.bar_rotation, value),
            "star_spokes" => set(&mut self.star_spokes, value),
            "star_radius" => set(&mut self.star_radius, value),
            "star_background_dist_center" => set(&mut self.star_background_dist_center, value),
            "star_background_dist_rim" => set(&mut self.star_background_dist_rim, value),
            "background_planar_width" => set(&mut self.background_planar_width, value),
            "background_planar_height" => set(&mut self.background_planar_height, value),
            "background_planar_dist" => set(&mut self.background_planar_dist, value),
            _ => false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        let target = Self::parse_str(&content, path)?;
        log::info!("Loaded target {} ({:?})", path.display(), target.variant);
        Ok(target)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = [
            ("variant", self.variant.code().to_string()),
            ("model_filename", format!("'{}'", self.model_filename)),
            ("number_of_bars", self.number_of_bars.to_string()),
            ("first_bar_width", self.first_bar_width.to_string()),
            ("first_bar_height", self.first_bar_height.to_string()),
            ("first_offset_x", self.first_offset_x.to_string()),
            ("first_offset_y", self.first_offset_y.to_string()),
            ("first_offset_z", self.first_offset_z.to_string()),
            ("next_bar_width_factor", self.next_bar_width_factor.to_string()),
            ("next_bar_width_offset", self.next_bar_width_offset.to_string()),
            ("next_bar_height_factor", self.next_bar_height_factor.to_string()),
            ("next_bar_height_offset", self.next_bar_height_offset.to_string()),
            ("next_offset_x_factor", self.next_offset_x_factor.to_string()),
            ("next_offset_x_offset", self.next_offset_x_offset.to_string()),
            ("next_offset_y_factor", self.next_offset_y_factor.to_string()),
            ("next_offset_y_offset", self.next_offset_y_offset.to_string()),
            ("next_offset_z_factor", self.next_offset_z_factor.to_string()),
            ("next_offset_z_offset", self.next_offset_z_offset.to_string()),
            ("bar_background_near_side", self.bar_background_near_side.to_string()),
            ("bar_background_dist_near", self.bar_background_dist_near.to_string()),
            ("bar_background_dist_far", self.bar_background_dist_far.to_string()),
            ("bar_rotation", self.bar_rotation.to_string()),
            ("star_spokes", self.star_spokes.to_string()),
            ("star_radius", self.star_radius.to_string()),
            ("star_background_dist_center", self.star_background_dist_center.to_string()),
            ("star_background_dist_rim", self.star_background_dist_rim.to_string()),
            ("background_planar_width", self.background_planar_width.to_string()),
            ("background_planar_height", self.background_planar_height.to_string()),
            ("background_planar_dist", self.background_planar_dist.to_string()),
        ];
        std::fs::write(path, textfile::render("TARGET", 1, &entries))
            .map_err(|e| SimError::io(path, e))
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    /// Triangle geometry for this description, tagged with `role`.
    pub fn geometry(&self, role: PatchRole) -> GeometryPatch {
        match self.variant {
            TargetVariant::Bars => self.bars_geometry(role),
            TargetVariant::Star => self.star_geometry(role),
            TargetVariant::BackgroundPlanar => self.planar_geometry(role),
            TargetVariant::Model => {
                log::warn!(
                    "model file '{}' not loaded, using a {}x{}x{} m box",
                    self.model_filename,
                    MODEL_FALLBACK_SIZE.x,
                    MODEL_FALLBACK_SIZE.y,
                    MODEL_FALLBACK_SIZE.z
                );
                let mut patch = GeometryPatch::new(role, Mat4::IDENTITY);
                patch.add_box(MODEL_FALLBACK_SIZE);
                patch
            }
        }
    }

    fn planar_geometry(&self, role: PatchRole) -> GeometryPatch {
        let mut patch = GeometryPatch::new(role, Mat4::IDENTITY);
        if self.background_planar_dist > 0.0 {
            let x = self.background_planar_width / 2.0;
            let y = self.background_planar_height / 2.0;
            let z = -self.background_planar_dist;
            patch.add_quad([
                Vec3::new(-x, -y, z),
                Vec3::new(x, -y, z),
                Vec3::new(x, y, z),
                Vec3::new(-x, y, z),
            ]);
        }
        patch
    }

    fn bars_geometry(&self, role: PatchRole) -> GeometryPatch {
        struct Bar {
            corner: Vec3,
            width: f32,
            height: f32,
        }

        let mut bars = Vec::with_capacity(self.number_of_bars as usize);
        let (mut width, mut height) = (self.first_bar_width, self.first_bar_height);
        let mut offset = Vec3::new(self.first_offset_x, self.first_offset_y, self.first_offset_z);
        let mut corner = Vec3::ZERO;
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for _ in 0..self.number_of_bars {
            bars.push(Bar {
                corner,
                width,
                height,
            });
            min = min.min(corner);
            max = max.max(corner + Vec3::new(width, height, 0.0));
            corner += offset;
            width = width * self.next_bar_width_factor + self.next_bar_width_offset;
            height = height * self.next_bar_height_factor + self.next_bar_height_offset;
            offset = offset
                * Vec3::new(
                    self.next_offset_x_factor,
                    self.next_offset_y_factor,
                    self.next_offset_z_factor,
                )
                + Vec3::new(
                    self.next_offset_x_offset,
                    self.next_offset_y_offset,
                    self.next_offset_z_offset,
                );
        }

        let transform = Mat4::from_rotation_z(self.bar_rotation);
        let mut patch = GeometryPatch::new(role, transform);
        if bars.is_empty() {
            return patch;
        }

        // center in x/y, front at z=0
        let size = max - min;
        let shift = Vec3::new(size.x / 2.0, size.y / 2.0, max.z);
        for bar in &bars {
            let c = bar.corner - shift;
            patch.add_quad([
                c,
                c + Vec3::new(bar.width, 0.0, 0.0),
                c + Vec3::new(bar.width, bar.height, 0.0),
                c + Vec3::new(0.0, bar.height, 0.0),
            ]);
        }

        if let Some(side) = NearSide::from_code(self.bar_background_near_side) {
            let (x, y) = (size.x / 2.0, size.y / 2.0);
            let z = min.z - max.z;
            let (near, far) = (self.bar_background_dist_near, self.bar_background_dist_far);
            // (top left, top right, bottom left, bottom right)
            let (tl, tr, bl, br) = match side {
                NearSide::Left => (near, far, near, far),
                NearSide::Top => (near, near, far, far),
                NearSide::Right => (far, near, far, near),
                NearSide::Bottom => (far, far, near, near),
            };
            patch.add_quad([
                Vec3::new(-x, -y, z - bl),
                Vec3::new(x, -y, z - br),
                Vec3::new(x, y, z - tr),
                Vec3::new(-x, y, z - tl),
            ]);
        }
        patch
    }

    fn star_geometry(&self, role: PatchRole) -> GeometryPatch {
        let mut patch = GeometryPatch::new(role, Mat4::IDENTITY);
        if self.star_spokes == 0 {
            return patch;
        }
        let spoke = std::f32::consts::PI / self.star_spokes as f32;
        let start = -spoke / 2.0;
        let r = self.star_radius;
        for i in 0..2 * self.star_spokes {
            let a0 = start + i as f32 * spoke;
            let a1 = a0 + spoke;
            let (s0, c0) = a0.sin_cos();
            let (s1, c1) = a1.sin_cos();
            patch.add_triangle([
                Vec3::new(0.0, 0.0, -self.star_background_dist_center),
                Vec3::new(r * c0, r * s0, -self.star_background_dist_rim),
                Vec3::new(r * c1, r * s1, -self.star_background_dist_rim),
            ]);
            if i % 2 == 0 {
                patch.add_triangle([
                    Vec3::ZERO,
                    Vec3::new(r * c0, r * s0, 0.0),
                    Vec3::new(r * c1, r * s1, 0.0),
                ]);
            }
        }
        patch
    }
}
