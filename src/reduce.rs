//! Reduction of the oversampled map to sensor resolution.
//!
//! Each sensor pixel covers `pixel_width × pixel_height` subpixels. Only the
//! photon-sensitive part of a pixel (the mask rectangle, in normalized pixel
//! coordinates with y running upward from the pixel's bottom edge) collects
//! light, so every subpixel carries the exact area it shares with that
//! rectangle as its weight.

use crate::grid::{Grid, Texel, CH_A, CH_B, CH_DEPTH, CH_ENERGY};
use crate::params::SimulatorParams;

/// Cache key of a [`PixelApertureMask`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskGeometry {
    pub subdiv_x: u32,
    pub subdiv_y: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl MaskGeometry {
    pub fn from_params(params: &SimulatorParams) -> Self {
        Self {
            subdiv_x: params.pixel_width,
            subdiv_y: params.pixel_height,
            x: params.pixel_mask_x,
            y: params.pixel_mask_y,
            width: params.pixel_mask_width,
            height: params.pixel_mask_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelApertureMask {
    geometry: MaskGeometry,
    /// Row 0 is the top subpixel row.
    weights: Grid<f32>,
}

impl PixelApertureMask {
    pub fn new(geometry: MaskGeometry) -> Self {
        let (w, h) = (geometry.subdiv_x as usize, geometry.subdiv_y as usize);
        let (cell_w, cell_h) = (1.0 / w as f32, 1.0 / h as f32);
        let mut weights = Grid::new(w, h);
        for row in 0..h {
            // cells are counted from the bottom of the pixel
            let cell_y = (h - 1 - row) as f32 * cell_h;
            for col in 0..w {
                let cell_x = col as f32 * cell_w;
                let x0 = cell_x.max(geometry.x);
                let y0 = cell_y.max(geometry.y);
                let sw = (cell_x + cell_w).min(geometry.x + geometry.width) - x0;
                let sh = (cell_y + cell_h).min(geometry.y + geometry.height) - y0;
                let area = if sw > 0.0 && sh > 0.0 { sw * sh } else { 0.0 };
                *weights.get_mut(col, row) = area * (w * h) as f32;
            }
        }
        Self { geometry, weights }
    }

    pub fn geometry(&self) -> MaskGeometry {
        self.geometry
    }

    pub fn weights(&self) -> &Grid<f32> {
        &self.weights
    }

    pub fn weight_sum(&self) -> f32 {
        self.weights.as_slice().iter().sum()
    }
}

/// Box reduction through a [`PixelApertureMask`].
///
/// `a`, `b` and `energy` are mask-weighted sums over the pixel's subpixels;
/// `depth` is taken from the center subpixel, which is why subdivisions are
/// odd.
pub struct SpatialReducer;

impl SpatialReducer {
    pub fn reduce(map: &Grid<Texel>, mask: &PixelApertureMask, out: &mut Grid<Texel>) {
        let sw = mask.weights.width();
        let sh = mask.weights.height();
        let (pw, ph) = (map.width() / sw, map.height() / sh);
        if out.width() != pw || out.height() != ph {
            out.resize(pw, ph);
        }
        let (cx, cy) = (sw / 2, sh / 2);

        for py in 0..ph {
            for px in 0..pw {
                let (x0, y0) = (px * sw, py * sh);
                let mut acc = [0.0f32; 4];
                for sy in 0..sh {
                    let row = &map.row(y0 + sy)[x0..x0 + sw];
                    let weights = mask.weights.row(sy);
                    for (texel, w) in row.iter().zip(weights) {
                        acc[CH_A] += texel[CH_A] * w;
                        acc[CH_B] += texel[CH_B] * w;
                        acc[CH_ENERGY] += texel[CH_ENERGY] * w;
                    }
                }
                acc[CH_DEPTH] = map.get(x0 + cx, y0 + cy)[CH_DEPTH];
                *out.get_mut(px, py) = acc;
            }
        }
    }
}
