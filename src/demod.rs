//! Four-phase quadrature demodulation.

use std::f64::consts::{PI, SQRT_2};

use crate::energy::PHASES;
use crate::grid::{Grid, Texel, CH_A, CH_B};
use crate::params::{SimulatorParams, SPEED_OF_LIGHT};

/// Result channel indices.
pub const RES_DEPTH: usize = 0;
pub const RES_AMPLITUDE: usize = 1;
pub const RES_INTENSITY: usize = 2;

/// Per pixel `[depth, amplitude, intensity]`.
pub type ResultMap = Grid<[f32; 3]>;

const AMPLITUDE_SCALE: f32 = (PI / SQRT_2) as f32;

/// Depth, amplitude and intensity from the four phase images.
pub fn demodulate_into(phases: [&Grid<Texel>; PHASES], modulation_frequency: u32, out: &mut ResultMap) {
    let (w, h) = (phases[0].width(), phases[0].height());
    if out.width() != w || out.height() != h {
        out.resize(w, h);
    }
    let range = (SPEED_OF_LIGHT / (2.0 * modulation_frequency as f64)) as f32;
    let tau = std::f32::consts::TAU;

    for (idx, res) in out.as_mut_slice().iter_mut().enumerate() {
        let t = phases.map(|p| p.as_slice()[idx]);
        let p = t.map(|x| x[CH_A] - x[CH_B]);
        let i = p[0] - p[2];
        let q = p[1] - p[3];
        let mut phase = q.atan2(i);
        if phase < 0.0 {
            phase += tau;
        }
        if phase >= tau {
            phase -= tau;
        }
        res[RES_DEPTH] = phase / tau * range;
        res[RES_AMPLITUDE] = (i * i + q * q).sqrt() * AMPLITUDE_SCALE;
        res[RES_INTENSITY] = 0.5 * t.iter().map(|x| x[CH_A] + x[CH_B]).sum::<f32>();
    }
}

pub fn demodulate(phases: [&Grid<Texel>; PHASES], modulation_frequency: u32) -> ResultMap {
    let mut out = Grid::new(phases[0].width(), phases[0].height());
    demodulate_into(phases, modulation_frequency, &mut out);
    out
}

/// Value ranges used to scale the result channels for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRanges {
    pub ambiguity_range: f32,
    pub max_energy: f32,
    pub max_amplitude: f32,
    pub max_intensity: f32,
    pub depth_range: f32,
}

impl DisplayRanges {
    pub fn new(params: &SimulatorParams) -> Self {
        let ambiguity_range = params.ambiguity_range() as f32;
        let max_energy = params.lightsource_simple_power * 1e4;
        Self {
            ambiguity_range,
            max_energy,
            max_amplitude: 4.0 * max_energy * AMPLITUDE_SCALE,
            max_intensity: 2.0 * max_energy,
            depth_range: ambiguity_range.min(params.far_plane),
        }
    }

    /// Upper bound of result channel `c`.
    pub fn channel_max(&self, c: usize) -> f32 {
        match c {
            RES_DEPTH => self.depth_range,
            RES_AMPLITUDE => self.max_amplitude,
            _ => self.max_intensity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const FREQ: u32 = 10_000_000;

    /// Ideal taps for a surface at `depth`: `offset ± amplitude·m`.
    fn phase_images(depth: f32, amplitude: f32, offset: f32) -> Vec<Grid<Texel>> {
        let ppm = (2.0 * PI * FREQ as f64 / SPEED_OF_LIGHT) as f32;
        (0..PHASES)
            .map(|k| {
                let m = (ppm * 2.0 * depth - k as f32 * FRAC_PI_2).cos();
                let mut g = Grid::new(1, 1);
                g.fill([offset + amplitude * m, offset - amplitude * m, depth, 2.0 * offset]);
                g
            })
            .collect()
    }

    fn run(images: &[Grid<Texel>]) -> [f32; 3] {
        let out = demodulate([&images[0], &images[1], &images[2], &images[3]], FREQ);
        *out.get(0, 0)
    }

    #[test]
    fn test_round_trip_recovers_depth() {
        let range = (SPEED_OF_LIGHT / (2.0 * FREQ as f64)) as f32;
        for depth in [0.05, 0.3, 1.0, 2.0, 7.5, 14.9] {
            let r = run(&phase_images(depth, 10.0, 40.0));
            assert!(depth < range);
            assert!((r[RES_DEPTH] - depth).abs() < 1e-3, "{} vs {}", r[RES_DEPTH], depth);
        }
    }

    #[test]
    fn test_amplitude_scale() {
        // P_k = 2·a0·m_k, so |I + jQ| = 4·a0
        let a0 = 10.0;
        let r = run(&phase_images(1.0, a0, 40.0));
        let expected = 2.0 * (2.0 * a0) * AMPLITUDE_SCALE;
        assert!((r[RES_AMPLITUDE] - expected).abs() < 1e-2 * expected);
    }

    #[test]
    fn test_intensity_is_half_total_tap_energy() {
        let r = run(&phase_images(1.0, 10.0, 40.0));
        assert!((r[RES_INTENSITY] - 160.0).abs() < 1e-3);
    }

    #[test]
    fn test_dark_pixel_is_zero() {
        let g = Grid::new(2, 2);
        let out = demodulate([&g, &g, &g, &g], FREQ);
        assert!(out.as_slice().iter().all(|r| *r == [0.0; 3]));
    }

    #[test]
    fn test_display_ranges() {
        let params = SimulatorParams::default();
        let d = DisplayRanges::new(&params);
        assert!((d.ambiguity_range - 14.9896).abs() < 1e-3);
        assert_eq!(d.depth_range, params.far_plane);
        assert_eq!(d.max_energy, 2e6);
        assert_eq!(d.channel_max(RES_INTENSITY), 4e6);
    }
}
