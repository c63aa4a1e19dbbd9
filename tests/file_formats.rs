//! Description files on disk: simulator, target and animation.
//!
//! Run with: cargo test --test file_formats

use std::path::{Path, PathBuf};

use glam::Vec3;
use pmdsim::animation::AnimationTrack;
use pmdsim::animation_parser;
use pmdsim::params::SimulatorParams;
use pmdsim::target::{Target, TargetVariant};
use pmdsim::SimError;

struct TempDir(PathBuf);

impl TempDir {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("pmdsim-files-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.0.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[test]
fn test_animation_v2_file() {
    let dir = TempDir::new("anim-v2");
    let path = dir.write(
        "a.anim",
        "PMDSIM ANIMATION VERSION 2\n\
         # warm up\n\
         0.0   cart(0, 0, -0.2)  abs_rot  angle_axis(0,0,0,1)\n\
         \n\
         1.5   cart(0.1,0,-0.5)  camrel_rot  angle_axis(0,0,0,1)\n\
         2.0   bogus\n",
    );
    let track = animation_parser::load(&path).unwrap();
    assert_eq!(track.len(), 2);
    assert_eq!(track.start_time(), 0);
    assert_eq!(track.end_time(), 1_500_000);
    let (pos, _) = track.interpolate(0).unwrap();
    assert!((pos - Vec3::new(0.0, 0.0, -0.2)).length() < 1e-6);
}

#[test]
fn test_animation_v1_file() {
    let dir = TempDir::new("anim-v1");
    let path = dir.write(
        "a.anim",
        "PMDSIMTAP ANIMATION VERSION 1\n\
         0.0 0 0 -1 0 0 0 1\n\
         0.5 0 0 -2 90 0 0 1\n",
    );
    let track = animation_parser::load(&path).unwrap();
    assert_eq!(track.len(), 2);
    let (pos, _) = track.interpolate(250_000).unwrap();
    assert!((pos.z + 1.5).abs() < 1e-5);
}

#[test]
fn test_failed_animation_load_keeps_track() {
    let dir = TempDir::new("anim-keep");
    let good = dir.write(
        "good.anim",
        "PMDSIM ANIMATION VERSION 2\n0 cart(0,0,-1) abs_rot angle_axis(0,0,0,1)\n",
    );
    let bad = dir.write("bad.anim", "PMDSIM TARGET VERSION 1\n");

    let mut track = AnimationTrack::new();
    track.load_into(&good).unwrap();
    let before = track.clone();
    let err = track.load_into(&bad).unwrap_err();
    assert!(matches!(err, SimError::InvalidHeader { .. }));
    assert_eq!(track, before);
    assert!(track.load_into(&dir.path().join("missing.anim")).is_err());
    assert_eq!(track, before);
}

#[test]
fn test_failed_params_load_keeps_params() {
    let dir = TempDir::new("sim-keep");
    let bad = dir.write("bad.sim", "PMDSIM SIMULATOR VERSION 1\npixel_width 4\n");

    let mut params = SimulatorParams {
        contrast: 0.4,
        ..SimulatorParams::default()
    };
    let before = params.clone();
    let err = params.load_into(&bad).unwrap_err();
    assert!(matches!(err, SimError::InvalidParams(_)));
    assert_eq!(params, before);
}

#[test]
fn test_params_save_and_load() {
    let dir = TempDir::new("sim-save");
    let params = SimulatorParams {
        sensor_width: 64,
        sensor_height: 48,
        exposure_time_samples: 3,
        contrast: 0.6,
        modulation_frequency: 20_000_000,
        ..SimulatorParams::default()
    };
    let path = dir.path().join("s.sim");
    params.save(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("PMDSIM SIMULATOR VERSION 1\n"));
    assert!(content.contains("lightsource_measured_intensities ''\n"));
    assert_eq!(SimulatorParams::load(&path).unwrap(), params);
}

#[test]
fn test_legacy_power_key_is_accepted() {
    let dir = TempDir::new("sim-legacy");
    let path = dir.write(
        "old.sim",
        "PMDSIM SIMULATOR VERSION 1\nlightsource_power 120\nunknown_key 3\n",
    );
    let params = SimulatorParams::load(&path).unwrap();
    assert_eq!(params.lightsource_simple_power, 120.0);
}

#[test]
fn test_intensity_table_relative_to_simulator_file() {
    let dir = TempDir::new("sim-table");
    std::fs::create_dir_all(dir.path().join("light")).unwrap();
    dir.write(
        "light/led.json",
        r#"{"width": 2, "height": 1, "values": [0.5, 1.0]}"#,
    );
    let path = dir.write(
        "s.sim",
        "PMDSIM SIMULATOR VERSION 1\n\
         lightsource_model 1\n\
         lightsource_measured_intensities 'light/led.json'\n",
    );
    let params = SimulatorParams::load(&path).unwrap();
    let table = params.lightsource_measured_intensities.unwrap();
    assert_eq!((table.width, table.height), (2, 1));
    // W/sr are stored as mW/sr
    assert_eq!(table.values, vec![500.0, 1000.0]);
    assert_eq!(table.source.as_deref(), Some(dir.path().join("light/led.json").as_path()));
}

#[test]
fn test_missing_intensity_table_fails() {
    let dir = TempDir::new("sim-notable");
    let path = dir.write(
        "s.sim",
        "PMDSIM SIMULATOR VERSION 1\nlightsource_measured_intensities 'nope.json'\n",
    );
    assert!(matches!(
        SimulatorParams::load(&path),
        Err(SimError::Io { .. })
    ));
}

#[test]
fn test_target_save_and_load() {
    let dir = TempDir::new("target");
    let mut target = Target::new(TargetVariant::Bars);
    target.number_of_bars = 12;
    target.bar_rotation = 0.25;
    target.bar_background_near_side = -1;
    let path = dir.path().join("bars.target");
    target.save(&path).unwrap();
    assert_eq!(Target::load(&path).unwrap(), target);

    let bad = dir.write("bad.target", "PMDSIM ANIMATION VERSION 2\n");
    assert!(matches!(
        Target::load(&bad),
        Err(SimError::InvalidHeader { kind: "target", .. })
    ));
}
