//! Per-phase energy map rendering.
//!
//! For phase offset `i` the scene is rasterized into the oversampled map; every
//! fragment stores `[a, b, depth, energy]`:
//!
//! - `depth` is the distance from the camera center,
//! - `energy` is the light energy (attojoules) collected by one subpixel
//!   during one exposure sample, for a Lambertian surface lit by a light
//!   source co-located with the camera,
//! - `a`/`b` split that energy between the two taps according to the
//!   modulation term `cos(2π·f·2d/c − i·π/2)` weighted by the contrast.
//!
//! Rasterization itself is behind the [`Rasterizer`] trait; [`shade`] is the
//! reference for what every backend computes per fragment.
//!
//! [`shade`]: EnergyShading::shade

use std::f32::consts::{FRAC_PI_2, PI};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::error::Result;
use crate::grid::{Grid, Texel};
use crate::params::{IntensityTable, LightSourceModel, SimulatorParams, SPEED_OF_LIGHT};
use crate::scene::Scene;

/// Number of phase offsets per frame.
pub const PHASES: usize = 4;

// ============================================================================
// Shading constants
// ============================================================================

/// Everything the fragment stage needs for one phase step. Laid out for a
/// uniform buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct EnergyShading {
    /// mW/sr inside the cone; negative selects the measured table.
    pub light_intensity: f32,
    pub light_cos_half_angle: f32,
    pub table_start_x: f32,
    pub table_end_x: f32,
    pub table_start_y: f32,
    pub table_end_y: f32,
    pub table_width: u32,
    pub table_height: u32,
    /// 2π·f/c, radians of modulation phase per meter of light path.
    pub phase_per_meter: f32,
    /// Phase offset i·π/2.
    pub tau: f32,
    pub contrast: f32,
    pub reflectivity: f32,
    /// Fraction of scene radiance reaching the sensor: (π/4)·(D/f)².
    pub aperture_efficiency: f32,
    /// Subpixel area (m²) × sample duration (s) × mW→aJ conversion.
    pub energy_scale: f32,
    pub _pad: [f32; 2],
}

impl EnergyShading {
    pub fn new(params: &SimulatorParams, phase: usize) -> Self {
        let table = match params.lightsource_model {
            LightSourceModel::Measured => params.lightsource_measured_intensities.as_ref(),
            LightSourceModel::Simple => None,
        };
        let (light_intensity, light_cos_half_angle) = match table {
            Some(_) => (-1.0, -1.0),
            None => {
                let half = (params.lightsource_simple_aperture_angle / 2.0).to_radians();
                let solid_angle = 2.0 * PI * (1.0 - half.cos());
                (params.lightsource_simple_power / solid_angle, half.cos())
            }
        };

        let d_over_f = params.lens_aperture_diameter / params.lens_focal_length;
        let subdiv = (params.pixel_width * params.pixel_height) as f64;
        let subpixel_area = (params.pixel_pitch as f64 * 1e-6).powi(2) / subdiv;
        let sample_secs =
            params.exposure_time as f64 * 1e-6 / params.exposure_time_samples as f64;

        Self {
            light_intensity,
            light_cos_half_angle,
            table_start_x: table.map_or(0.0, |t| t.start_x),
            table_end_x: table.map_or(0.0, |t| t.end_x),
            table_start_y: table.map_or(0.0, |t| t.start_y),
            table_end_y: table.map_or(0.0, |t| t.end_y),
            table_width: table.map_or(0, |t| t.width as u32),
            table_height: table.map_or(0, |t| t.height as u32),
            phase_per_meter: (2.0 * std::f64::consts::PI * params.modulation_frequency as f64
                / SPEED_OF_LIGHT) as f32,
            tau: phase as f32 * FRAC_PI_2,
            contrast: params.contrast,
            reflectivity: params.material_lambertian_reflectivity,
            aperture_efficiency: PI / 4.0 * d_over_f * d_over_f,
            energy_scale: (subpixel_area * sample_secs * 1e15) as f32,
            _pad: [0.0; 2],
        }
    }

    pub fn uses_table(&self) -> bool {
        self.light_intensity < 0.0
    }

    /// Light source intensity (mW/sr) toward camera-space point `p`.
    pub fn intensity_toward(&self, p: Vec3, table: Option<&IntensityTable>) -> f32 {
        if self.uses_table() {
            table.map_or(0.0, |t| t.sample(p.x.atan2(-p.z), p.y.atan2(-p.z)))
        } else if -p.z / p.length() >= self.light_cos_half_angle {
            self.light_intensity
        } else {
            0.0
        }
    }

    /// Fragment output for a surface point `p` with unit normal `n`, both in
    /// camera coordinates.
    pub fn shade(&self, p: Vec3, n: Vec3, table: Option<&IntensityTable>) -> Texel {
        let depth = p.length();
        if depth <= 0.0 {
            return [0.0; 4];
        }
        let to_light = -p / depth;
        let cos_i = n.dot(to_light).max(0.0);
        let irradiance = self.intensity_toward(p, table) * cos_i / (depth * depth);
        let radiance = self.reflectivity * irradiance / PI;
        let energy = radiance * self.aperture_efficiency * self.energy_scale;

        let m = (self.phase_per_meter * 2.0 * depth - self.tau).cos();
        let a = 0.5 * energy * (1.0 + self.contrast * m);
        let b = 0.5 * energy * (1.0 - self.contrast * m);
        [a, b, depth, energy]
    }
}

// ============================================================================
// Rasterization contract
// ============================================================================

/// Output size and projection of the oversampled map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSetup {
    pub width: usize,
    pub height: usize,
    /// Vertical field of view, radians.
    pub fovy: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl RasterSetup {
    pub fn from_params(params: &SimulatorParams) -> Self {
        Self {
            width: params.map_width() as usize,
            height: params.map_height() as usize,
            fovy: params.aperture_angle.to_radians(),
            aspect: params.aspect_ratio(),
            near: params.near_plane,
            far: params.far_plane,
        }
    }

    /// Camera-to-clip transform (depth range 0..1).
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy, self.aspect, self.near, self.far)
    }
}

/// Fills an oversampled map with [`EnergyShading::shade`] results for the
/// nearest visible surface of every texel center. Texels without geometry are
/// zero. Row 0 of the target is the top of the image.
pub trait Rasterizer {
    fn name(&self) -> &str;

    fn rasterize(
        &mut self,
        scene: &Scene,
        setup: &RasterSetup,
        shading: &EnergyShading,
        table: Option<&IntensityTable>,
        target: &mut Grid<Texel>,
    ) -> Result<()>;
}

// ============================================================================
// Renderer
// ============================================================================

pub struct EnergyMapRenderer {
    rasterizer: Box<dyn Rasterizer>,
}

impl EnergyMapRenderer {
    pub fn new(rasterizer: Box<dyn Rasterizer>) -> Self {
        Self { rasterizer }
    }

    pub fn backend(&self) -> &str {
        self.rasterizer.name()
    }

    /// Render phase `phase` of the current scene into `target`, which must be
    /// sized to the parameters' map resolution.
    pub fn render(
        &mut self,
        scene: &Scene,
        params: &SimulatorParams,
        phase: usize,
        target: &mut Grid<Texel>,
    ) -> Result<()> {
        let setup = RasterSetup::from_params(params);
        let shading = EnergyShading::new(params, phase);
        let table = match params.lightsource_model {
            LightSourceModel::Measured => params.lightsource_measured_intensities.as_ref(),
            LightSourceModel::Simple => None,
        };
        self.rasterizer
            .rasterize(scene, &setup, &shading, table, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shading_layout_is_uniform_friendly() {
        assert_eq!(std::mem::size_of::<EnergyShading>(), 64);
    }

    #[test]
    fn test_simple_light_intensity() {
        let params = SimulatorParams::default();
        let s = EnergyShading::new(&params, 0);
        let expected = 200.0 / (2.0 * PI * (1.0 - 45f32.to_radians().cos()));
        assert!((s.light_intensity - expected).abs() < 1e-3);
        assert!(!s.uses_table());
        assert_eq!(EnergyShading::new(&params, 3).tau, 3.0 * FRAC_PI_2);
    }

    #[test]
    fn test_taps_split_energy() {
        let params = SimulatorParams::default();
        let s = EnergyShading::new(&params, 1);
        let t = s.shade(Vec3::new(0.0, 0.0, -1.0), Vec3::Z, None);
        assert!((t[2] - 1.0).abs() < 1e-6);
        assert!(t[3] > 0.0);
        assert!((t[0] + t[1] - t[3]).abs() < 1e-6 * t[3]);
    }

    #[test]
    fn test_inverse_square_falloff() {
        let s = EnergyShading::new(&SimulatorParams::default(), 0);
        let near = s.shade(Vec3::new(0.0, 0.0, -0.5), Vec3::Z, None)[3];
        let far = s.shade(Vec3::new(0.0, 0.0, -1.0), Vec3::Z, None)[3];
        assert!((near / far - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_outside_light_cone_is_dark() {
        let s = EnergyShading::new(&SimulatorParams::default(), 0);
        let p = Vec3::new(2.0, 0.0, -1.0);
        assert_eq!(s.shade(p, -p.normalize(), None)[3], 0.0);
    }

    #[test]
    fn test_grazing_or_backfacing_is_dark() {
        let s = EnergyShading::new(&SimulatorParams::default(), 0);
        assert_eq!(s.shade(Vec3::new(0.0, 0.0, -1.0), Vec3::NEG_Z, None)[3], 0.0);
    }

    #[test]
    fn test_measured_table_lookup() {
        let mut params = SimulatorParams::default();
        params.lightsource_model = LightSourceModel::Measured;
        params.lightsource_measured_intensities = Some(
            IntensityTable::from_samples(
                3,
                3,
                &[0.1; 9],
                (-FRAC_PI_2, -FRAC_PI_2),
                (FRAC_PI_2, FRAC_PI_2),
            )
            .unwrap(),
        );
        let s = EnergyShading::new(&params, 0);
        assert!(s.uses_table());
        assert_eq!(s.table_width, 3);
        let i = s.intensity_toward(
            Vec3::new(0.0, 0.0, -1.0),
            params.lightsource_measured_intensities.as_ref(),
        );
        assert!((i - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_raster_setup() {
        let setup = RasterSetup::from_params(&SimulatorParams::default());
        assert_eq!(setup.width, 352 * 7);
        assert_eq!(setup.height, 288 * 7);
        assert!((setup.fovy - 70f32.to_radians()).abs() < 1e-6);
    }
}
