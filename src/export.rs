//! Frame and animation export.
//!
//! A frame is written as one CSV file per channel (rows top to bottom, values
//! comma separated), optionally prefixed with a five digit frame number:
//!
//! ```text
//! 00012-raw-depth-0.csv   phase 0 raw depth
//! 00012-sim-phase-a-2.csv phase 2 tap A energy
//! 00012-sim-depth.csv     demodulated depth
//! 00012-sim-coords.csv    x,y,z per pixel
//! ```
//!
//! Files are written concurrently from an immutable [`FrameSnapshot`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::demod::{DisplayRanges, ResultMap, RES_AMPLITUDE, RES_DEPTH, RES_INTENSITY};
use crate::energy::PHASES;
use crate::error::{Result, SimError};
use crate::grid::{Grid, Texel, CH_A, CH_B, CH_DEPTH, CH_ENERGY};
use crate::params::SimulatorParams;
use crate::stepper::{FrameSnapshot, FrameStepper};

/// One exported file.
#[derive(Debug, Clone, Copy)]
enum ChannelData<'a> {
    Phase(&'a Grid<Texel>, usize),
    Demodulated(&'a ResultMap, usize),
    /// Camera-space points from the raw depth of this phase image.
    Coords(&'a Grid<Texel>),
}

struct ChannelFile<'a> {
    name: String,
    data: ChannelData<'a>,
}

fn channel_files(snapshot: &FrameSnapshot) -> Vec<ChannelFile<'_>> {
    let mut files = Vec::with_capacity(5 * PHASES);
    let phase_channels = [
        ("raw-depth", CH_DEPTH),
        ("raw-energy", CH_ENERGY),
        ("sim-phase-a", CH_A),
        ("sim-phase-b", CH_B),
    ];
    for (stem, c) in phase_channels {
        for (k, phase) in snapshot.phases.iter().enumerate() {
            files.push(ChannelFile {
                name: format!("{}-{}", stem, k),
                data: ChannelData::Phase(phase, c),
            });
        }
    }
    for (stem, c) in [
        ("sim-depth", RES_DEPTH),
        ("sim-amplitude", RES_AMPLITUDE),
        ("sim-intensity", RES_INTENSITY),
    ] {
        files.push(ChannelFile {
            name: stem.to_string(),
            data: ChannelData::Demodulated(&snapshot.result, c),
        });
    }
    files.push(ChannelFile {
        name: "sim-coords".to_string(),
        data: ChannelData::Coords(&snapshot.phases[0]),
    });
    files
}

/// Base names (without frame prefix and extension) of every file a frame
/// export writes.
pub fn channel_names() -> Vec<String> {
    let mut names = Vec::new();
    for stem in ["raw-depth", "raw-energy", "sim-phase-a", "sim-phase-b"] {
        names.extend((0..PHASES).map(|k| format!("{}-{}", stem, k)));
    }
    names.extend(
        ["sim-depth", "sim-amplitude", "sim-intensity", "sim-coords"]
            .iter()
            .map(|s| s.to_string()),
    );
    names
}

fn frame_prefix(frame: Option<u64>) -> String {
    frame.map(|f| format!("{:05}-", f)).unwrap_or_default()
}

/// Half extents of the view frustum at distance 1.
fn view_extent(params: &SimulatorParams) -> (f32, f32) {
    let top = (params.aperture_angle.to_radians() / 2.0).tan();
    (params.aspect_ratio() * top, top)
}

fn write_rows<W, F>(out: &mut W, width: usize, height: usize, mut cell: F) -> std::io::Result<()>
where
    W: Write,
    F: FnMut(&mut W, usize, usize) -> std::io::Result<()>,
{
    for y in 0..height {
        for x in 0..width {
            if x > 0 {
                out.write_all(b",")?;
            }
            cell(out, x, y)?;
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn write_channel(path: &Path, data: ChannelData<'_>, params: &SimulatorParams) -> Result<()> {
    let file = File::create(path).map_err(|e| SimError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let written = match data {
        ChannelData::Phase(grid, c) => write_rows(&mut out, grid.width(), grid.height(), |o, x, y| {
            write!(o, "{}", grid.get(x, y)[c])
        }),
        ChannelData::Demodulated(grid, c) => write_rows(&mut out, grid.width(), grid.height(), |o, x, y| {
            write!(o, "{}", grid.get(x, y)[c])
        }),
        ChannelData::Coords(grid) => {
            let (right, top) = view_extent(params);
            let (w, h) = (grid.width() as f32, grid.height() as f32);
            write_rows(&mut out, grid.width(), grid.height(), |o, x, y| {
                let p = pixel_point(x, y, w, h, right, top, grid.get(x, y)[CH_DEPTH]);
                write!(o, "{},{},{}", p[0], p[1], p[2])
            })
        }
    };
    written
        .and_then(|_| out.flush())
        .map_err(|e| SimError::io(path, e))
}

/// Point at `depth` along the view ray through the center of pixel (x, y).
fn pixel_point(x: usize, y: usize, w: f32, h: f32, right: f32, top: f32, depth: f32) -> [f32; 3] {
    let ray = [
        (2.0 * (x as f32 + 0.5) / w - 1.0) * right,
        (1.0 - 2.0 * (y as f32 + 0.5) / h) * top,
        -1.0,
    ];
    let len = (ray[0] * ray[0] + ray[1] * ray[1] + 1.0).sqrt();
    ray.map(|c| c * depth / len)
}

/// Write every channel of `snapshot` into `dir`. All files are attempted; the
/// first failure is returned.
pub fn export_frame(snapshot: &FrameSnapshot, dir: &Path, frame: Option<u64>) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| SimError::io(dir, e))?;
    let prefix = frame_prefix(frame);
    let files = channel_files(snapshot);

    let results: Vec<Result<()>> = files
        .par_iter()
        .map(|f| {
            let path = dir.join(format!("{}{}.csv", prefix, f.name));
            write_channel(&path, f.data, &snapshot.params)
        })
        .collect();
    results.into_iter().collect::<Result<Vec<()>>>()?;
    Ok(())
}

/// 8-bit grayscale previews of the result channels scaled to the display
/// ranges. Returns the written paths.
pub fn write_previews(snapshot: &FrameSnapshot, dir: &Path, frame: Option<u64>) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| SimError::io(dir, e))?;
    let ranges = DisplayRanges::new(&snapshot.params);
    let prefix = frame_prefix(frame);
    let result = &snapshot.result;

    let mut paths = Vec::new();
    for (stem, c) in [
        ("sim-depth", RES_DEPTH),
        ("sim-amplitude", RES_AMPLITUDE),
        ("sim-intensity", RES_INTENSITY),
    ] {
        let max = ranges.channel_max(c);
        let pixels: Vec<u8> = result
            .as_slice()
            .iter()
            .map(|r| {
                let v = if max > 0.0 { r[c] / max } else { 0.0 };
                (v.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect();
        let path = dir.join(format!("{}{}.png", prefix, stem));
        image::save_buffer(
            &path,
            &pixels,
            result.width() as u32,
            result.height() as u32,
            image::ColorType::L8,
        )?;
        paths.push(path);
    }
    Ok(paths)
}

// ============================================================================
// Animation export
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Also write PNG previews of every frame.
    pub previews: bool,
    /// Animation file the track was loaded from, hashed into the metadata.
    pub animation_file: Option<PathBuf>,
}

/// Written as metadata.json next to the exported frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    /// Parameters of the last exported frame.
    pub params: SimulatorParams,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub export_duration_secs: f64,

    pub frame_count: u64,

    /// Microseconds.
    pub first_frame_time: i64,
    pub last_frame_time: i64,

    /// SHA-256 of the animation file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_hash: Option<String>,

    /// Rasterizer backend.
    pub backend: String,

    pub pmdsim_version: String,
}

impl ExportMetadata {
    /// Compute SHA-256 hash of file content.
    pub fn hash_file(path: &Path) -> Result<String> {
        use std::io::Read;

        let mut file = File::open(path).map_err(|e| SimError::io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = file.read(&mut buffer).map_err(|e| SimError::io(path, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| SimError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Simulate and export every frame of the loaded animation into `dir`.
pub fn export_animation(
    stepper: &mut FrameStepper,
    dir: &Path,
    options: &ExportOptions,
) -> Result<ExportMetadata> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let animation_hash = options
        .animation_file
        .as_deref()
        .map(ExportMetadata::hash_file)
        .transpose()?;

    let mut first_frame_time = None;
    let mut last_frame_time = 0;
    let frame_count = stepper.run_animation(|frame, snapshot| {
        export_frame(snapshot, dir, Some(frame))?;
        if options.previews {
            write_previews(snapshot, dir, Some(frame))?;
        }
        first_frame_time.get_or_insert(snapshot.time);
        last_frame_time = snapshot.time;
        Ok(())
    })?;

    let metadata = ExportMetadata {
        params: stepper.params().clone(),
        started_at,
        completed_at: Utc::now(),
        export_duration_secs: clock.elapsed().as_secs_f64(),
        frame_count,
        first_frame_time: first_frame_time.unwrap_or(0),
        last_frame_time,
        animation_hash,
        backend: stepper.backend().to_string(),
        pmdsim_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    metadata.save(&dir.join("metadata.json"))?;
    info!(
        "exported {} frames to {} in {:.1}s",
        frame_count,
        dir.display(),
        metadata.export_duration_secs
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pmdsim-export-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn snapshot() -> FrameSnapshot {
        let params = SimulatorParams {
            sensor_width: 3,
            sensor_height: 2,
            ..SimulatorParams::default()
        };
        let phases = std::array::from_fn(|k| {
            let mut g = Grid::new(3, 2);
            for y in 0..2 {
                for x in 0..3 {
                    *g.get_mut(x, y) = [k as f32, 0.5, 1.0 + x as f32, (10 * y + x) as f32];
                }
            }
            g
        });
        let mut result = Grid::new(3, 2);
        result.fill([1.0, 2.0e6, 3.0]);
        FrameSnapshot {
            params,
            time: 0,
            phases,
            result,
        }
    }

    #[test]
    fn test_channel_names() {
        let names = channel_names();
        assert_eq!(names.len(), 20);
        assert_eq!(names[0], "raw-depth-0");
        assert_eq!(names[7], "raw-energy-3");
        assert_eq!(names[19], "sim-coords");
        let snap = snapshot();
        let files = channel_files(&snap);
        let from_files: Vec<String> = files.into_iter().map(|f| f.name).collect();
        assert_eq!(from_files, names);
    }

    #[test]
    fn test_export_frame_writes_every_channel() {
        let dir = temp_dir("frame");
        export_frame(&snapshot(), &dir, Some(7)).unwrap();
        for name in channel_names() {
            assert!(dir.join(format!("00007-{}.csv", name)).exists(), "{}", name);
        }
        let energy = std::fs::read_to_string(dir.join("00007-raw-energy-2.csv")).unwrap();
        assert_eq!(energy, "0,1,2\n10,11,12\n");
        let a = std::fs::read_to_string(dir.join("00007-sim-phase-a-3.csv")).unwrap();
        assert!(a.starts_with("3,3,3\n"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_coords_lie_on_view_rays() {
        let params = SimulatorParams::default();
        let (right, top) = view_extent(&params);
        let p = pixel_point(0, 0, 2.0, 2.0, right, top, 2.0);
        let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        assert!((len - 2.0).abs() < 1e-5);
        assert!(p[0] < 0.0 && p[1] > 0.0 && p[2] < 0.0);
    }

    #[test]
    fn test_export_into_unwritable_location_fails() {
        let dir = temp_dir("blocked");
        std::fs::create_dir_all(dir.parent().unwrap()).unwrap();
        std::fs::write(&dir, "not a directory").unwrap();
        assert!(export_frame(&snapshot(), &dir, None).is_err());
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn test_previews() {
        let dir = temp_dir("previews");
        let paths = write_previews(&snapshot(), &dir, None).unwrap();
        assert_eq!(paths.len(), 3);
        let img = image::open(&paths[0]).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (3, 2));
        // depth 1 m of a 2 m display range
        assert_eq!(img.get_pixel(0, 0)[0], 128);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = temp_dir("meta");
        std::fs::create_dir_all(&dir).unwrap();
        let anim = dir.join("a.anim");
        std::fs::write(&anim, "PMDSIM ANIMATION VERSION 1\n").unwrap();
        let meta = ExportMetadata {
            params: SimulatorParams::default(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            export_duration_secs: 0.5,
            frame_count: 3,
            first_frame_time: 0,
            last_frame_time: 16_000,
            animation_hash: Some(ExportMetadata::hash_file(&anim).unwrap()),
            backend: "cpu".into(),
            pmdsim_version: env!("CARGO_PKG_VERSION").into(),
        };
        let path = dir.join("metadata.json");
        meta.save(&path).unwrap();
        let back = ExportMetadata::load(&path).unwrap();
        assert_eq!(back.frame_count, 3);
        assert_eq!(back.params, meta.params);
        assert_eq!(back.animation_hash.as_ref().map(|h| h.len()), Some(64));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
