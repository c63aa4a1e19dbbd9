use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::animation_parser;
use crate::energy::{EnergyMapRenderer, Rasterizer};
use crate::export::{self, ExportOptions};
use crate::gpu::GpuRasterizer;
use crate::params::SimulatorParams;
use crate::raster::CpuRasterizer;
use crate::scene::Scene;
use crate::stepper::{Command, FrameStepper};
use crate::target::Target;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by the simulation commands.
#[derive(Args)]
struct SceneArgs {
    /// Simulator file (defaults apply when omitted)
    #[arg(long)]
    simulator: Option<PathBuf>,

    /// Background target file
    #[arg(long)]
    background: Option<PathBuf>,

    /// Target file
    #[arg(long)]
    target: Option<PathBuf>,

    /// Rasterize on the GPU instead of the CPU
    #[arg(long)]
    gpu: bool,

    /// Also write PNG previews of depth, amplitude and intensity
    #[arg(long)]
    png: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one frame and export it
    Frame {
        #[command(flatten)]
        scene: SceneArgs,

        /// Animation file driving the target pose
        #[arg(long)]
        animation: Option<PathBuf>,

        /// Animation time in seconds (snapped to a whole frame)
        #[arg(long)]
        time: Option<f64>,

        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Simulate and export every frame of an animation
    Animation {
        #[command(flatten)]
        scene: SceneArgs,

        /// Animation file driving the target pose
        #[arg(long)]
        animation: PathBuf,

        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Write default simulator, background and target files
    Defaults {
        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Frame {
            scene,
            animation,
            time,
            out,
        } => export_single_frame(&scene, animation.as_deref(), time, &out),
        Commands::Animation {
            scene,
            animation,
            out,
        } => export_all_frames(&scene, &animation, &out),
        Commands::Defaults { out } => write_defaults(&out),
    }
}

fn build_stepper(args: &SceneArgs) -> Result<FrameStepper> {
    let params = match &args.simulator {
        Some(path) => SimulatorParams::load(path)
            .with_context(|| format!("Failed to load simulator {}", path.display()))?,
        None => SimulatorParams::default(),
    };
    let background = match &args.background {
        Some(path) => Target::load(path)
            .with_context(|| format!("Failed to load background {}", path.display()))?,
        None => Target::planar_background(),
    };
    let target = match &args.target {
        Some(path) => Target::load(path)
            .with_context(|| format!("Failed to load target {}", path.display()))?,
        None => Target::default(),
    };

    let rasterizer: Box<dyn Rasterizer> = if args.gpu {
        let gpu = GpuRasterizer::headless().context("Failed to set up GPU rasterizer")?;
        println!("Using GPU adapter {}", gpu.adapter());
        Box::new(gpu)
    } else {
        Box::new(CpuRasterizer::new())
    };

    let scene = Scene::from_targets(&background, &target);
    let stepper = FrameStepper::new(params, scene, EnergyMapRenderer::new(rasterizer))?;
    Ok(stepper)
}

fn load_track(stepper: &mut FrameStepper, path: &Path) -> Result<()> {
    let track = animation_parser::load(path)
        .with_context(|| format!("Failed to load animation {}", path.display()))?;
    stepper.submit(Command::SetTrack(track));
    stepper.submit(Command::Enable(true));
    Ok(())
}

fn export_single_frame(args: &SceneArgs, animation: Option<&Path>, time: Option<f64>, out: &Path) -> Result<()> {
    let mut stepper = build_stepper(args)?;
    if let Some(path) = animation {
        load_track(&mut stepper, path)?;
        stepper.submit(Command::Play);
        if let Some(secs) = time {
            stepper.submit(Command::Seek(animation_parser::secs_to_micros(secs)));
        }
    }

    let report = stepper.step()?;
    let snapshot = stepper.snapshot()?;
    export::export_frame(&snapshot, out, None)
        .with_context(|| format!("Failed to export frame to {}", out.display()))?;
    if args.png {
        export::write_previews(&snapshot, out, None)?;
    }
    println!(
        "Exported frame at {:.6}s ({:?}) to {:?}",
        report.time as f64 * 1e-6,
        report.state,
        out
    );
    Ok(())
}

fn export_all_frames(args: &SceneArgs, animation: &Path, out: &Path) -> Result<()> {
    let mut stepper = build_stepper(args)?;
    load_track(&mut stepper, animation)?;

    let options = ExportOptions {
        previews: args.png,
        animation_file: Some(animation.to_path_buf()),
    };
    println!("Exporting animation frames to {:?}...", out);
    let metadata = export::export_animation(&mut stepper, out, &options)
        .with_context(|| format!("Failed to export animation to {}", out.display()))?;
    println!(
        "Done: {} frames in {:.1}s.",
        metadata.frame_count, metadata.export_duration_secs
    );
    Ok(())
}

fn write_defaults(out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)?;
    SimulatorParams::default().save(&out.join("default.sim"))?;
    Target::planar_background().save(&out.join("background.target"))?;
    Target::default().save(&out.join("target.target"))?;
    println!("Wrote default files to {:?}", out);
    Ok(())
}
