//! Software rasterizer.
//!
//! Reference backend for [`Rasterizer`]: near/far clipping in camera space,
//! back-face culling of clockwise triangles, a depth test on camera distance
//! along the view axis and perspective-correct attribute interpolation,
//! sampled at texel centers.

use glam::{Vec3, Vec4Swizzles};

use crate::energy::{EnergyShading, RasterSetup, Rasterizer};
use crate::error::Result;
use crate::grid::{Grid, Texel};
use crate::params::IntensityTable;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    p: Vec3,
    n: Vec3,
}

/// Screen-space vertex: `s` in texel coordinates, `inv_w` = 1/clip.w.
#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    sx: f32,
    sy: f32,
    inv_w: f32,
    v: ClipVertex,
}

/// Keep the part of `poly` where `dist >= 0`.
fn clip_polygon(poly: &[ClipVertex], dist: impl Fn(Vec3) -> f32) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(poly.len() + 1);
    for (i, cur) in poly.iter().enumerate() {
        let next = &poly[(i + 1) % poly.len()];
        let (dc, dn) = (dist(cur.p), dist(next.p));
        if dc >= 0.0 {
            out.push(*cur);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            let t = dc / (dc - dn);
            out.push(ClipVertex {
                p: cur.p.lerp(next.p, t),
                n: cur.n.lerp(next.n, t),
            });
        }
    }
    out
}

fn edge(ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32) -> f32 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

#[derive(Debug, Default)]
pub struct CpuRasterizer {
    depth: Vec<f32>,
}

impl CpuRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_triangle(
        &mut self,
        tri: [ScreenVertex; 3],
        width: usize,
        height: usize,
        shading: &EnergyShading,
        table: Option<&IntensityTable>,
        target: &mut Grid<Texel>,
    ) {
        let [a, b, c] = tri;
        let area = edge(a.sx, a.sy, b.sx, b.sy, c.sx, c.sy);
        // Counter-clockwise in NDC is clockwise with y pointing down.
        if area >= 0.0 {
            return;
        }
        let min_x = a.sx.min(b.sx).min(c.sx).floor().max(0.0) as usize;
        let max_x = (a.sx.max(b.sx).max(c.sx).ceil() as isize).clamp(0, width as isize) as usize;
        let min_y = a.sy.min(b.sy).min(c.sy).floor().max(0.0) as usize;
        let max_y = (a.sy.max(b.sy).max(c.sy).ceil() as isize).clamp(0, height as isize) as usize;

        for y in min_y..max_y {
            let py = y as f32 + 0.5;
            for x in min_x..max_x {
                let px = x as f32 + 0.5;
                let w0 = edge(b.sx, b.sy, c.sx, c.sy, px, py) / area;
                let w1 = edge(c.sx, c.sy, a.sx, a.sy, px, py) / area;
                let w2 = edge(a.sx, a.sy, b.sx, b.sy, px, py) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let (q0, q1, q2) = (w0 * a.inv_w, w1 * b.inv_w, w2 * c.inv_w);
                let sum = q0 + q1 + q2;
                if sum <= 0.0 {
                    continue;
                }
                let (q0, q1, q2) = (q0 / sum, q1 / sum, q2 / sum);
                let p = a.v.p * q0 + b.v.p * q1 + c.v.p * q2;
                let z = -p.z;
                let slot = &mut self.depth[y * width + x];
                if z >= *slot {
                    continue;
                }
                *slot = z;
                let n = (a.v.n * q0 + b.v.n * q1 + c.v.n * q2).normalize_or_zero();
                *target.get_mut(x, y) = shading.shade(p, n, table);
            }
        }
    }
}

impl Rasterizer for CpuRasterizer {
    fn name(&self) -> &str {
        "cpu"
    }

    fn rasterize(
        &mut self,
        scene: &Scene,
        setup: &RasterSetup,
        shading: &EnergyShading,
        table: Option<&IntensityTable>,
        target: &mut Grid<Texel>,
    ) -> Result<()> {
        let (width, height) = (setup.width, setup.height);
        if target.width() != width || target.height() != height {
            target.resize(width, height);
        }
        target.fill([0.0; 4]);
        self.depth.clear();
        self.depth.resize(width * height, f32::INFINITY);

        let proj = setup.projection();
        let (near, far) = (setup.near, setup.far);
        for tri in scene.triangles() {
            let poly: Vec<ClipVertex> = (0..3)
                .map(|i| ClipVertex {
                    p: tri.positions[i],
                    n: tri.normals[i],
                })
                .collect();
            let poly = clip_polygon(&poly, |p| -p.z - near);
            let poly = clip_polygon(&poly, |p| far + p.z);
            if poly.len() < 3 {
                continue;
            }
            let screen: Vec<ScreenVertex> = poly
                .iter()
                .map(|v| {
                    let clip = proj * v.p.extend(1.0);
                    let ndc = clip.xyz() / clip.w;
                    ScreenVertex {
                        sx: (ndc.x + 1.0) * 0.5 * width as f32,
                        sy: (1.0 - ndc.y) * 0.5 * height as f32,
                        inv_w: 1.0 / clip.w,
                        v: *v,
                    }
                })
                .collect();
            for i in 1..screen.len() - 1 {
                self.draw_triangle(
                    [screen[0], screen[i], screen[i + 1]],
                    width,
                    height,
                    shading,
                    table,
                    target,
                );
            }
        }
        Ok(())
    }
}
