//! Simulator parameters.
//!
//! A [`SimulatorParams`] value describes the optics, the light source, the
//! sensor and its timing. It is read from and written to simulator files:
//!
//! ```text
//! PMDSIM SIMULATOR VERSION 1
//! aperture_angle 70
//! sensor_width 352
//! lightsource_measured_intensities 'led.json'
//! ```
//!
//! Keys missing from a file keep their defaults; unknown keys are skipped with
//! a warning. Every loaded value set is validated before it is handed out.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::textfile::{self, quoted, set};

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Largest accepted intensity table dimension.
pub const MAX_TABLE_SIZE: usize = 4096;

// ============================================================================
// Light source intensity table
// ============================================================================

/// Angle-dependent light source intensities in mW/sr.
///
/// Samples are laid out row-major; x runs over the horizontal angle, y over
/// the vertical angle. `start_*`/`end_*` are the angles (radians) at the outer
/// borders of the table, i.e. half a sample step beyond the first and last
/// sample positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntensityTable {
    pub source: Option<PathBuf>,
    pub width: usize,
    pub height: usize,
    pub start_x: f32,
    pub end_x: f32,
    pub start_y: f32,
    pub end_y: f32,
    pub values: Vec<f32>,
}

/// On-disk table layout. Values are in W/sr.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntensityTableFile {
    width: usize,
    height: usize,
    values: Vec<f32>,
    #[serde(default = "default_first_sample")]
    first_x: f32,
    #[serde(default = "default_last_sample")]
    last_x: f32,
    #[serde(default = "default_first_sample")]
    first_y: f32,
    #[serde(default = "default_last_sample")]
    last_y: f32,
}

fn default_first_sample() -> f32 {
    -std::f32::consts::FRAC_PI_2
}

fn default_last_sample() -> f32 {
    std::f32::consts::FRAC_PI_2
}

impl IntensityTable {
    /// Build a table from W/sr samples placed at evenly spaced angles from
    /// `first` to `last` (radians, x and y).
    pub fn from_samples(
        width: usize,
        height: usize,
        watts_per_sr: &[f32],
        first: (f32, f32),
        last: (f32, f32),
    ) -> std::result::Result<Self, String> {
        if width == 0 || height == 0 || width > MAX_TABLE_SIZE || height > MAX_TABLE_SIZE {
            return Err(format!("unsupported table size {}x{}", width, height));
        }
        if watts_per_sr.len() != width * height {
            return Err(format!(
                "expected {} values, found {}",
                width * height,
                watts_per_sr.len()
            ));
        }
        let step = |n: usize, a: f32, b: f32| if n == 1 { 0.0 } else { (b - a) / (n - 1) as f32 };
        let step_x = step(width, first.0, last.0);
        let step_y = step(height, first.1, last.1);
        Ok(Self {
            source: None,
            width,
            height,
            start_x: first.0 - 0.5 * step_x,
            end_x: last.0 + 0.5 * step_x,
            start_y: first.1 - 0.5 * step_y,
            end_y: last.1 + 0.5 * step_y,
            values: watts_per_sr.iter().map(|v| v * 1000.0).collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        let file: IntensityTableFile =
            serde_json::from_str(&content).map_err(|e| SimError::InvalidTable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let mut table = Self::from_samples(
            file.width,
            file.height,
            &file.values,
            (file.first_x, file.first_y),
            (file.last_x, file.last_y),
        )
        .map_err(|reason| SimError::InvalidTable {
            path: path.to_path_buf(),
            reason,
        })?;
        table.source = Some(path.to_path_buf());
        log::info!(
            "Loaded light source table {} ({}x{})",
            path.display(),
            table.width,
            table.height
        );
        Ok(table)
    }

    /// Bilinear lookup at horizontal/vertical angles (radians). Zero outside
    /// the table's angular domain.
    pub fn sample(&self, angle_x: f32, angle_y: f32) -> f32 {
        if self.values.is_empty()
            || !(self.start_x..=self.end_x).contains(&angle_x)
            || !(self.start_y..=self.end_y).contains(&angle_y)
        {
            return 0.0;
        }
        let coord = |a: f32, start: f32, end: f32, n: usize| {
            let span = end - start;
            let u = if span > 0.0 { (a - start) / span } else { 0.5 };
            (u * n as f32 - 0.5).clamp(0.0, (n - 1) as f32)
        };
        let fx = coord(angle_x, self.start_x, self.end_x, self.width);
        let fy = coord(angle_y, self.start_y, self.end_y, self.height);
        let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(self.width - 1), (y0 + 1).min(self.height - 1));
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
        let at = |x: usize, y: usize| self.values[y * self.width + x];
        let top = at(x0, y0) * (1.0 - tx) + at(x1, y0) * tx;
        let bottom = at(x0, y1) * (1.0 - tx) + at(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

// ============================================================================
// Simulator parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LightSourceModel {
    /// Homogeneous power over a cone.
    Simple,
    /// Angle-dependent intensities from a measured table.
    Measured,
}

impl LightSourceModel {
    fn code(self) -> u32 {
        match self {
            LightSourceModel::Simple => 0,
            LightSourceModel::Measured => 1,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(LightSourceModel::Simple),
            1 => Some(LightSourceModel::Measured),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorParams {
    /// Vertical field of view in degrees.
    pub aperture_angle: f32,
    /// Meters.
    pub near_plane: f32,
    /// Meters.
    pub far_plane: f32,
    /// Temporal samples per exposure.
    pub exposure_time_samples: u32,
    /// Only 0 (rasterization) is defined.
    pub rendering_method: u32,
    /// Only 0 (Lambertian) is defined.
    pub material_model: u32,
    /// In [0,1].
    pub material_lambertian_reflectivity: f32,
    pub lightsource_model: LightSourceModel,
    /// Milliwatt.
    pub lightsource_simple_power: f32,
    /// Full cone angle in degrees.
    pub lightsource_simple_aperture_angle: f32,
    pub lightsource_measured_intensities: Option<IntensityTable>,
    /// Millimeters.
    pub lens_aperture_diameter: f32,
    /// Millimeters.
    pub lens_focal_length: f32,
    pub sensor_width: u32,
    pub sensor_height: u32,
    /// Light-sensitive pixel area in normalized pixel space [0,1]².
    pub pixel_mask_x: f32,
    pub pixel_mask_y: f32,
    pub pixel_mask_width: f32,
    pub pixel_mask_height: f32,
    /// Subpixels per pixel column; must be odd.
    pub pixel_width: u32,
    /// Subpixels per pixel row; must be odd.
    pub pixel_height: u32,
    /// Micrometers.
    pub pixel_pitch: f32,
    /// Microseconds.
    pub readout_time: u32,
    /// In [0,1].
    pub contrast: f32,
    /// Hz.
    pub modulation_frequency: u32,
    /// Microseconds.
    pub exposure_time: u32,
}

impl Default for SimulatorParams {
    fn default() -> Self {
        Self {
            aperture_angle: 70.0,
            near_plane: 0.05,
            far_plane: 2.0,
            exposure_time_samples: 1,
            rendering_method: 0,
            material_model: 0,
            material_lambertian_reflectivity: 0.7,
            lightsource_model: LightSourceModel::Simple,
            lightsource_simple_power: 200.0,
            lightsource_simple_aperture_angle: 90.0,
            lightsource_measured_intensities: None,
            lens_aperture_diameter: 8.89,
            lens_focal_length: 16.0,
            sensor_width: 352,
            sensor_height: 288,
            pixel_mask_x: 1.3 / 7.2,
            pixel_mask_y: 0.0,
            pixel_mask_width: 4.6 / 7.2,
            pixel_mask_height: 0.5,
            pixel_width: 7,
            pixel_height: 7,
            pixel_pitch: 12.0,
            readout_time: 1000,
            contrast: 0.75,
            modulation_frequency: 10_000_000,
            exposure_time: 1000,
        }
    }
}

impl SimulatorParams {
    pub fn map_width(&self) -> u32 {
        self.sensor_width * self.pixel_width
    }

    pub fn map_height(&self) -> u32 {
        self.sensor_height * self.pixel_height
    }

    /// Assumes square pixels.
    pub fn aspect_ratio(&self) -> f32 {
        self.sensor_width as f32 / self.sensor_height as f32
    }

    /// Microseconds covered by one simulated frame (four phases).
    pub fn frame_duration(&self) -> i64 {
        4 * (self.exposure_time as i64 + self.readout_time as i64)
    }

    /// Maximum unambiguous depth in meters.
    pub fn ambiguity_range(&self) -> f64 {
        SPEED_OF_LIGHT / (2.0 * self.modulation_frequency as f64)
    }

    /// Reject parameter sets the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SimError::InvalidParams(msg));
        let positive = [
            ("near_plane", self.near_plane),
            ("lens_aperture_diameter", self.lens_aperture_diameter),
            ("lens_focal_length", self.lens_focal_length),
            ("pixel_pitch", self.pixel_pitch),
        ];
        for (name, v) in positive {
            if !(v > 0.0) || !v.is_finite() {
                return fail(format!("{} must be positive, got {}", name, v));
            }
        }
        if !(self.far_plane > self.near_plane) || !self.far_plane.is_finite() {
            return fail(format!(
                "far_plane ({}) must lie beyond near_plane ({})",
                self.far_plane, self.near_plane
            ));
        }
        if !(self.aperture_angle > 0.0 && self.aperture_angle < 180.0) {
            return fail(format!("aperture_angle {} not in (0, 180)", self.aperture_angle));
        }
        if self.exposure_time_samples == 0 {
            return fail("exposure_time_samples must be at least 1".to_string());
        }
        if self.rendering_method != 0 {
            return fail(format!("unknown rendering_method {}", self.rendering_method));
        }
        if self.material_model != 0 {
            return fail(format!("unknown material_model {}", self.material_model));
        }
        for (name, v) in [
            ("material_lambertian_reflectivity", self.material_lambertian_reflectivity),
            ("contrast", self.contrast),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("{} {} not in [0, 1]", name, v));
            }
        }
        match self.lightsource_model {
            LightSourceModel::Simple => {
                if !(self.lightsource_simple_power >= 0.0) {
                    return fail("lightsource_simple_power must not be negative".to_string());
                }
                let a = self.lightsource_simple_aperture_angle;
                if !(a > 0.0 && a <= 360.0) {
                    return fail(format!("lightsource_simple_aperture_angle {} not in (0, 360]", a));
                }
            }
            LightSourceModel::Measured => {
                if self.lightsource_measured_intensities.is_none() {
                    return fail("measured light source model needs an intensity table".to_string());
                }
            }
        }
        if self.sensor_width == 0 || self.sensor_height == 0 {
            return fail("sensor size must be positive".to_string());
        }
        for (name, v) in [("pixel_width", self.pixel_width), ("pixel_height", self.pixel_height)] {
            if v == 0 || v % 2 == 0 {
                return fail(format!("{} must be odd, got {}", name, v));
            }
        }
        let (mx, my, mw, mh) = (
            self.pixel_mask_x,
            self.pixel_mask_y,
            self.pixel_mask_width,
            self.pixel_mask_height,
        );
        if !(mw > 0.0 && mh > 0.0 && mx >= 0.0 && my >= 0.0 && mx + mw <= 1.0 + 1e-6 && my + mh <= 1.0 + 1e-6)
        {
            return fail(format!(
                "pixel mask ({}, {}, {}, {}) must lie inside the unit square",
                mx, my, mw, mh
            ));
        }
        if self.exposure_time == 0 {
            return fail("exposure_time must be positive".to_string());
        }
        if self.modulation_frequency == 0 {
            return fail("modulation_frequency must be positive".to_string());
        }
        Ok(())
    }

    /// Parse simulator file content. Relative table paths are resolved
    /// against `base_dir`.
    pub fn parse_str(content: &str, source: &Path, base_dir: &Path) -> Result<Self> {
        if textfile::header_version(content.lines().next(), "SIMULATOR") != Some(1) {
            return Err(SimError::InvalidHeader {
                path: source.to_path_buf(),
                kind: "simulator",
            });
        }

        let mut params = Self::default();
        for (line_no, line) in textfile::content_lines(content) {
            let applied = match textfile::key_value(line) {
                Some((key, value)) => params.apply(key, value, base_dir)?,
                None => false,
            };
            if !applied {
                log::warn!("ignoring {} line {}", source.display(), line_no);
            }
        }
        params.validate()?;
        Ok(params)
    }

    /// Set one key. Returns `false` for unknown keys and unparsable values.
    fn apply(&mut self, key: &str, value: &str, base_dir: &Path) -> Result<bool> {
        let ok = match key {
            "aperture_angle" => set(&mut self.aperture_angle, value),
            "near_plane" => set(&mut self.near_plane, value),
            "far_plane" => set(&mut self.far_plane, value),
            "exposure_time_samples" => set(&mut self.exposure_time_samples, value),
            "rendering_method" => set(&mut self.rendering_method, value),
            "material_model" => set(&mut self.material_model, value),
            "material_lambertian_reflectivity" => {
                set(&mut self.material_lambertian_reflectivity, value)
            }
            "lightsource_model" => match value.parse().ok().and_then(LightSourceModel::from_code) {
                Some(m) => {
                    self.lightsource_model = m;
                    true
                }
                None => false,
            },
            // older files call it lightsource_power
            "lightsource_simple_power" | "lightsource_power" => {
                set(&mut self.lightsource_simple_power, value)
            }
            "lightsource_simple_aperture_angle" => {
                set(&mut self.lightsource_simple_aperture_angle, value)
            }
            "lightsource_measured_intensities" => match quoted(value) {
                Some("") => {
                    self.lightsource_measured_intensities = None;
                    true
                }
                Some(file) => {
                    let path = base_dir.join(file);
                    self.lightsource_measured_intensities = Some(IntensityTable::load(&path)?);
                    true
                }
                None => false,
            },
            "lens_aperture_diameter" => set(&mut self.lens_aperture_diameter, value),
            "lens_focal_length" => set(&mut self.lens_focal_length, value),
            "sensor_width" => set(&mut self.sensor_width, value),
            "sensor_height" => set(&mut self.sensor_height, value),
            "pixel_mask_x" => set(&mut self.pixel_mask_x, value),
            "pixel_mask_y" => set(&mut self.pixel_mask_y, value),
            "pixel_mask_width" => set(&mut self.pixel_mask_width, value),
            "pixel_mask_height" => set(&mut self.pixel_mask_height, value),
            "pixel_width" => set(&mut self.pixel_width, value),
            "pixel_height" => set(&mut self.pixel_height, value),
            "pixel_pitch" => set(&mut self.pixel_pitch, value),
            "readout_time" => set(&mut self.readout_time, value),
            "contrast" => set(&mut self.contrast, value),
            "modulation_frequency" => set(&mut self.modulation_frequency, value),
            "exposure_time" => set(&mut self.exposure_time, value),
            _ => false,
        };
        Ok(ok)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let params = Self::parse_str(&content, path, base_dir)?;
        log::info!("Loaded simulator {}", path.display());
        Ok(params)
    }

    /// Replace `self` with the contents of `path`. On any failure `self` is
    /// left untouched.
    pub fn load_into(&mut self, path: &Path) -> Result<()> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Key/value pairs in file order.
    fn entries(&self) -> Vec<(&'static str, String)> {
        let table = self
            .lightsource_measured_intensities
            .as_ref()
            .and_then(|t| t.source.as_ref())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        vec![
            ("aperture_angle", self.aperture_angle.to_string()),
            ("near_plane", self.near_plane.to_string()),
            ("far_plane", self.far_plane.to_string()),
            ("exposure_time_samples", self.exposure_time_samples.to_string()),
            ("rendering_method", self.rendering_method.to_string()),
            ("material_model", self.material_model.to_string()),
            (
                "material_lambertian_reflectivity",
                self.material_lambertian_reflectivity.to_string(),
            ),
            ("lightsource_model", self.lightsource_model.code().to_string()),
            ("lightsource_simple_power", self.lightsource_simple_power.to_string()),
            (
                "lightsource_simple_aperture_angle",
                self.lightsource_simple_aperture_angle.to_string(),
            ),
            ("lightsource_measured_intensities", format!("'{}'", table)),
            ("lens_aperture_diameter", self.lens_aperture_diameter.to_string()),
            ("lens_focal_length", self.lens_focal_length.to_string()),
            ("sensor_width", self.sensor_width.to_string()),
            ("sensor_height", self.sensor_height.to_string()),
            ("pixel_mask_x", self.pixel_mask_x.to_string()),
            ("pixel_mask_y", self.pixel_mask_y.to_string()),
            ("pixel_mask_width", self.pixel_mask_width.to_string()),
            ("pixel_mask_height", self.pixel_mask_height.to_string()),
            ("pixel_width", self.pixel_width.to_string()),
            ("pixel_height", self.pixel_height.to_string()),
            ("pixel_pitch", self.pixel_pitch.to_string()),
            ("readout_time", self.readout_time.to_string()),
            ("contrast", self.contrast.to_string()),
            ("modulation_frequency", self.modulation_frequency.to_string()),
            ("exposure_time", self.exposure_time.to_string()),
        ]
    }

    pub fn to_file_string(&self) -> String {
        textfile::render("SIMULATOR", 1, &self.entries())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_file_string()).map_err(|e| SimError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<SimulatorParams> {
        SimulatorParams::parse_str(content, Path::new("test.sim"), Path::new("."))
    }

    #[test]
    fn test_defaults_are_valid() {
        let p = SimulatorParams::default();
        assert!(p.validate().is_ok());
        assert_eq!(p.map_width(), 352 * 7);
        assert_eq!(p.map_height(), 288 * 7);
        assert_eq!(p.frame_duration(), 8000);
        assert!((p.ambiguity_range() - 14.9896229).abs() < 1e-6);
    }

    #[test]
    fn test_values_override_defaults() {
        let p = parse(
            "PMDSIM SIMULATOR VERSION 1\n\
             # comment\n\
             sensor_width 64\n\
             lightsource_power 150\n\
             contrast 0.5\n\
             bogus_key 3\n\
             exposure_time abc\n",
        )
        .unwrap();
        assert_eq!(p.sensor_width, 64);
        assert_eq!(p.lightsource_simple_power, 150.0);
        assert_eq!(p.contrast, 0.5);
        assert_eq!(p.exposure_time, 1000);
        assert_eq!(p.sensor_height, 288);
    }

    #[test]
    fn test_tap_header_accepted() {
        assert!(parse("PMDSIMTAP SIMULATOR VERSION 1\n").is_ok());
        assert!(matches!(
            parse("PMDSIM SIMULATOR VERSION 2\n"),
            Err(SimError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_even_subdivision_rejected() {
        let err = parse("PMDSIM SIMULATOR VERSION 1\npixel_width 6\n").unwrap_err();
        assert!(matches!(err, SimError::InvalidParams(_)));
    }

    #[test]
    fn test_validation_limits() {
        let base = SimulatorParams::default();
        let cases: Vec<Box<dyn Fn(&mut SimulatorParams)>> = vec![
            Box::new(|p| p.pixel_height = 0),
            Box::new(|p| p.sensor_width = 0),
            Box::new(|p| p.far_plane = p.near_plane),
            Box::new(|p| p.near_plane = 0.0),
            Box::new(|p| p.exposure_time_samples = 0),
            Box::new(|p| p.contrast = 1.5),
            Box::new(|p| p.material_lambertian_reflectivity = -0.1),
            Box::new(|p| p.pixel_mask_x = 0.6),
            Box::new(|p| p.pixel_mask_width = 0.0),
            Box::new(|p| p.lightsource_model = LightSourceModel::Measured),
            Box::new(|p| p.modulation_frequency = 0),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut p = base.clone();
            mutate(&mut p);
            assert!(p.validate().is_err(), "case {} should be rejected", i);
        }
    }

    #[test]
    fn test_failed_load_keeps_previous() {
        let mut p = SimulatorParams::default();
        p.sensor_width = 33;
        p.contrast = 0.25;
        let before = p.clone();
        let missing = std::env::temp_dir().join("pmdsim-no-such-simulator.txt");
        assert!(p.load_into(&missing).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn test_save_load_preserves_values() {
        let mut p = SimulatorParams::default();
        p.sensor_width = 40;
        p.sensor_height = 30;
        p.pixel_mask_x = 0.125;
        p.modulation_frequency = 20_000_000;
        let path = std::env::temp_dir().join(format!("pmdsim-params-{}.txt", std::process::id()));
        p.save(&path).unwrap();
        let loaded = SimulatorParams::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, p);
    }

    #[test]
    fn test_table_domain_and_units() {
        let t = IntensityTable::from_samples(3, 1, &[0.1, 0.2, 0.3], (-1.0, 0.0), (1.0, 0.0)).unwrap();
        assert!((t.start_x + 1.5).abs() < 1e-6);
        assert!((t.end_x - 1.5).abs() < 1e-6);
        assert!((t.sample(0.0, 0.0) - 200.0).abs() < 1e-3);
        assert!((t.sample(0.5, 0.0) - 250.0).abs() < 1e-3);
        assert_eq!(t.sample(2.0, 0.0), 0.0);
    }

    #[test]
    fn test_table_rejects_bad_sizes() {
        assert!(IntensityTable::from_samples(2, 2, &[1.0; 3], (-1.0, -1.0), (1.0, 1.0)).is_err());
        assert!(IntensityTable::from_samples(0, 2, &[], (-1.0, -1.0), (1.0, 1.0)).is_err());
    }
}
