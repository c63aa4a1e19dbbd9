//! Frame orchestration.
//!
//! A [`FrameStepper`] owns the current parameters, animation track and scene
//! and turns them into one simulated sensor frame per [`FrameStepper::step`]
//! call. Input from the outside arrives as [`Command`]s; they are queued and
//! take effect at the next frame boundary, so a frame is always computed from
//! a single consistent parameter set.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use log::{debug, info, warn};

use crate::animation::AnimationTrack;
use crate::demod::{demodulate_into, ResultMap};
use crate::energy::{EnergyMapRenderer, PHASES};
use crate::error::{Result, SimError};
use crate::grid::{Grid, Texel};
use crate::params::SimulatorParams;
use crate::reduce::SpatialReducer;
use crate::resources::ResourceCache;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    /// Free interaction: the target pose is set from outside, time runs on
    /// the wall clock.
    Disabled,
    Stopped,
    Active,
    Paused,
}

#[derive(Debug, Clone)]
pub enum Command {
    SetParams(Box<SimulatorParams>),
    SetTrack(AnimationTrack),
    SetScene(Box<Scene>),
    Enable(bool),
    Play,
    Pause,
    Stop,
    /// Microseconds.
    Seek(i64),
    SetLoop(bool),
    SetTargetPose(Vec3, Quat),
}

/// What one [`FrameStepper::step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub index: u64,
    /// Simulation time of the frame start, microseconds.
    pub time: i64,
    pub state: AnimationState,
    /// Buffers were reallocated before the frame.
    pub rebuilt: bool,
    pub elapsed: Duration,
}

/// Immutable copy of everything an export needs from one frame.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub params: SimulatorParams,
    pub time: i64,
    pub phases: [Grid<Texel>; PHASES],
    pub result: ResultMap,
}

pub struct FrameStepper {
    params: SimulatorParams,
    track: AnimationTrack,
    scene: Scene,
    state: AnimationState,
    looping: bool,
    last_time: i64,
    seek: Option<i64>,
    queue: VecDeque<Command>,
    renderer: EnergyMapRenderer,
    cache: ResourceCache,
    realtime: bool,
    frames: u64,
}

impl FrameStepper {
    pub fn new(params: SimulatorParams, scene: Scene, renderer: EnergyMapRenderer) -> Result<Self> {
        params.validate()?;
        let cache = ResourceCache::new(&params);
        Ok(Self {
            params,
            track: AnimationTrack::new(),
            scene,
            state: AnimationState::Disabled,
            looping: false,
            last_time: 0,
            seek: None,
            queue: VecDeque::new(),
            renderer,
            cache,
            realtime: true,
            frames: 0,
        })
    }

    /// Pace free-interaction frames to the wall clock (on by default).
    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    pub fn submit(&mut self, command: Command) {
        self.queue.push_back(command);
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn params(&self) -> &SimulatorParams {
        &self.params
    }

    pub fn track(&self) -> &AnimationTrack {
        &self.track
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Start time of the last simulated frame.
    pub fn time(&self) -> i64 {
        self.last_time
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn backend(&self) -> &str {
        self.renderer.backend()
    }

    pub fn result(&self) -> &ResultMap {
        &self.cache.result
    }

    /// Phase images and result of the last completed frame.
    pub fn snapshot(&self) -> Result<FrameSnapshot> {
        let samples = self.params.exposure_time_samples as usize;
        let phases = self.cache.phases.completed_all(samples)?;
        Ok(FrameSnapshot {
            params: self.params.clone(),
            time: self.last_time,
            phases: phases.map(|p| p.clone()),
            result: self.cache.result.clone(),
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn apply_commands(&mut self) {
        while let Some(command) = self.queue.pop_front() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        use AnimationState::*;
        match command {
            Command::SetParams(params) => match params.validate() {
                Ok(()) => self.params = *params,
                Err(e) => warn!("keeping previous parameters: {}", e),
            },
            Command::SetTrack(track) => {
                self.track = track;
                if self.state != Disabled {
                    self.enter(if self.track.is_valid() { Stopped } else { Disabled });
                }
            }
            Command::SetScene(scene) => {
                let pose = self.scene.target_pose();
                self.scene = *scene;
                if self.state == Disabled {
                    let (_, rot, pos) = pose.to_scale_rotation_translation();
                    self.scene.set_target_pose(pos, rot);
                }
            }
            Command::Enable(true) if self.state == Disabled => {
                if self.track.is_valid() {
                    self.enter(Stopped);
                } else {
                    warn!("cannot enable animation: no valid track loaded");
                }
            }
            Command::Enable(true) => {}
            Command::Enable(false) => self.enter(Disabled),
            Command::Play => match self.state {
                Paused => self.enter(Active),
                Stopped => {
                    self.seek = Some(self.track.start_time());
                    self.enter(Active);
                }
                Active | Disabled => {}
            },
            Command::Pause if self.state == Active => self.enter(Paused),
            Command::Pause => {}
            Command::Stop if self.state != Disabled => self.enter(Stopped),
            Command::Stop => {}
            Command::Seek(t) => self.seek = Some(t),
            Command::SetLoop(looping) => self.looping = looping,
            Command::SetTargetPose(pos, rot) => {
                if self.state == Disabled {
                    self.scene.set_target_pose(pos, rot);
                }
            }
        }
    }

    fn enter(&mut self, state: AnimationState) {
        if state != self.state {
            debug!("animation state {:?} -> {:?}", self.state, state);
        }
        if state == AnimationState::Stopped {
            self.seek = None;
        }
        self.state = state;
    }

    /// Apply queued pose updates between exposure samples.
    fn apply_pose_commands(&mut self) {
        let scene = &mut self.scene;
        self.queue.retain(|command| match command {
            Command::SetTargetPose(pos, rot) => {
                scene.set_target_pose(*pos, *rot);
                false
            }
            _ => true,
        });
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Start time of the next frame, microseconds.
    fn next_frame_time(&mut self) -> i64 {
        let start = self.track.start_time();
        let end = self.track.end_time();
        let duration = self.params.frame_duration();
        let t = match self.state {
            AnimationState::Disabled => 0,
            AnimationState::Stopped => start,
            AnimationState::Active | AnimationState::Paused => {
                let t = match self.seek.take() {
                    Some(request) => (request.max(start) - start) / duration * duration + start,
                    None if self.state == AnimationState::Active => self.last_time + duration,
                    None => self.last_time,
                };
                if t <= end {
                    t
                } else if self.looping {
                    start
                } else {
                    (end - start) / duration * duration + start
                }
            }
        };
        self.last_time = t;
        t
    }

    /// Simulate one full frame: four phases, each integrated over the
    /// configured number of exposure samples, then demodulated.
    pub fn step(&mut self) -> Result<FrameReport> {
        let started = Instant::now();
        self.apply_commands();
        let rebuilt = self.cache.sync(&self.params)?;
        let time = self.next_frame_time();

        self.cache.begin_frame();
        let outcome = self.run_frame(time, started);
        self.cache.end_frame();
        outcome?;

        let report = FrameReport {
            index: self.frames,
            time,
            state: self.state,
            rebuilt,
            elapsed: started.elapsed(),
        };
        self.frames += 1;
        debug!(
            "frame {} at {} us ({:?}, {} backend) took {:?}",
            report.index,
            report.time,
            report.state,
            self.renderer.backend(),
            report.elapsed
        );
        Ok(report)
    }

    fn run_frame(&mut self, time: i64, started: Instant) -> Result<()> {
        let samples = self.params.exposure_time_samples as i64;
        let exposure = self.params.exposure_time as i64;
        let slot = exposure + self.params.readout_time as i64;
        let free = self.state == AnimationState::Disabled;

        for i in 0..PHASES {
            let phase_start = time + i as i64 * slot;
            for j in 0..samples {
                let t = phase_start + j * exposure / samples;
                if free {
                    self.apply_pose_commands();
                } else if let Some((pos, rot)) = self.track.interpolate(t) {
                    self.scene.set_target_pose(pos, rot);
                }

                let cache = &mut self.cache;
                self.renderer
                    .render(&self.scene, &self.params, i, &mut cache.oversampled)?;
                SpatialReducer::reduce(&cache.oversampled, &cache.mask, &mut cache.reduced);
                cache.phases.accumulate(i, j as usize, &cache.reduced)?;

                if free && self.realtime {
                    let until = if j < samples - 1 {
                        phase_start + (j + 1) * exposure / samples
                    } else {
                        time + (i as i64 + 1) * slot
                    };
                    active_wait(started, until);
                }
            }
        }

        let cache = &mut self.cache;
        let phases = cache.phases.completed_all(samples as usize)?;
        demodulate_into(phases, self.params.modulation_frequency, &mut cache.result);
        Ok(())
    }

    /// Run the whole animation from its start, handing every frame to `sink`.
    /// Stops once time no longer advances; returns the number of frames.
    pub fn run_animation<F>(&mut self, mut sink: F) -> Result<u64>
    where
        F: FnMut(u64, &FrameSnapshot) -> Result<()>,
    {
        self.submit(Command::Enable(true));
        self.submit(Command::Stop);
        self.submit(Command::Play);
        self.apply_commands();
        if self.state != AnimationState::Active {
            return Err(SimError::NoAnimation);
        }

        let mut frame = 0u64;
        loop {
            let previous = self.last_time;
            let report = self.step()?;
            if frame > 0 && report.time <= previous {
                break;
            }
            sink(frame, &self.snapshot()?)?;
            frame += 1;
        }
        self.submit(Command::Stop);
        self.apply_commands();
        info!("simulated {} animation frames", frame);
        Ok(frame)
    }
}

/// Sleep until `until_us` microseconds have passed since `started`.
fn active_wait(started: Instant, until_us: i64) {
    let until = Duration::from_micros(until_us.max(0) as u64);
    loop {
        let elapsed = started.elapsed();
        if elapsed >= until {
            break;
        }
        thread::sleep((until - elapsed).min(Duration::from_micros(500)));
    }
}
