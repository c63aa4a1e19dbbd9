//! Animation file reader.
//!
//! ```text
//! PMDSIM ANIMATION VERSION 2
//! # time  position            rotation mode  rotation
//! 0.0     cart(0,0,-0.2)      abs_rot        angle_axis(0,0,0,1)
//! 1.5     cyl(0.5, 30, 0.1)   camrel_rot     oldnew(0,0,-1, 0,1,-1)
//! ```
//!
//! Version 1 files carry eight numbers per line instead: time, position and
//! an angle (degrees) followed by a rotation axis. The tag may also read
//! `PMDSIMTAP`. Lines that cannot be understood are skipped with a warning.

use std::path::Path;
use std::sync::OnceLock;

use glam::{Quat, Vec3};
use regex::Regex;

use crate::animation::{angle_axis_to_quat, camera_facing, oldnew_to_quat, AnimationTrack, Keyframe};
use crate::error::{Result, SimError};
use crate::textfile;

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z_]+)\(([^()]*)\)$").expect("valid regex"))
}

/// Convert seconds to whole microseconds.
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * 1e6).round() as i64
}

/// Parse the textual content of an animation file. `source` names the file in
/// diagnostics.
pub fn parse_str(content: &str, source: &Path) -> Result<AnimationTrack> {
    let version = textfile::header_version(content.lines().next(), "ANIMATION")
        .filter(|v| *v == 1 || *v == 2)
        .ok_or_else(|| SimError::InvalidHeader {
            path: source.to_path_buf(),
            kind: "animation",
        })?;

    let mut track = AnimationTrack::new();
    for (line_no, trimmed) in textfile::content_lines(content) {
        let parsed = match version {
            1 => parse_v1_line(trimmed),
            _ => parse_v2_line(trimmed),
        };
        match parsed {
            Some(keyframe) => {
                if track.insert(keyframe) {
                    log::warn!(
                        "{} line {}: overwriting previously defined keyframe",
                        source.display(),
                        line_no
                    );
                }
            }
            None => log::warn!("ignoring {} line {}", source.display(), line_no),
        }
    }
    Ok(track)
}

/// Read and parse an animation file.
pub fn load(path: &Path) -> Result<AnimationTrack> {
    let content = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
    let track = parse_str(&content, path)?;
    log::info!(
        "Loaded animation {} ({} keyframes)",
        path.display(),
        track.len()
    );
    Ok(track)
}

impl AnimationTrack {
    /// Replace this track with the contents of `path`. On failure the track
    /// is left exactly as it was.
    pub fn load_into(&mut self, path: &Path) -> Result<()> {
        *self = load(path)?;
        Ok(())
    }
}

/// `t x y z angle ax ay az`
fn parse_v1_line(line: &str) -> Option<Keyframe> {
    let mut fields = line.split_whitespace();
    let t: f64 = fields.next()?.parse().ok()?;
    let mut v = [0f32; 7];
    for slot in v.iter_mut() {
        *slot = fields.next()?.parse().ok()?;
    }
    Some(Keyframe::new(
        secs_to_micros(t),
        Vec3::new(v[0], v[1], v[2]),
        angle_axis_to_quat(v[3].to_radians(), Vec3::new(v[4], v[5], v[6])),
    ))
}

/// Split on blanks and tabs, except inside parentheses where blanks are
/// dropped.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_paren = false;
    for c in line.chars() {
        match c {
            ' ' | '\t' => {
                if !in_paren && !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            '(' => {
                in_paren = true;
                current.push(c);
            }
            ')' => {
                in_paren = false;
                current.push(c);
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// `name(a,b,...)` with exactly `N` numeric arguments.
fn call<const N: usize>(token: &str, name: &str) -> Option<[f32; N]> {
    let caps = call_re().captures(token)?;
    if &caps[1] != name {
        return None;
    }
    let mut out = [0f32; N];
    let mut args = caps[2].split(',');
    for slot in out.iter_mut() {
        *slot = args.next()?.trim().parse().ok()?;
    }
    args.next().is_none().then_some(out)
}

fn parse_position(token: &str) -> Option<Vec3> {
    if let Some([x, y, z]) = call::<3>(token, "cart") {
        return Some(Vec3::new(x, y, z));
    }
    if let Some([r, theta, y]) = call::<3>(token, "cyl") {
        let (s, c) = (-theta).to_radians().sin_cos();
        return Some(Vec3::new(r * s, y, -r * c));
    }
    if let Some([r, theta, phi]) = call::<3>(token, "sph") {
        let (s, c) = (-theta).to_radians().sin_cos();
        let (sp, cp) = phi.to_radians().sin_cos();
        return Some(Vec3::new(r * cp * s, r * sp, -r * cp * c));
    }
    None
}

fn parse_rotation(token: &str) -> Option<Quat> {
    if let Some([a, x, y, z]) = call::<4>(token, "angle_axis") {
        return Some(angle_axis_to_quat(a.to_radians(), Vec3::new(x, y, z)));
    }
    if let Some([ox, oy, oz, nx, ny, nz]) = call::<6>(token, "oldnew") {
        return Some(oldnew_to_quat(Vec3::new(ox, oy, oz), Vec3::new(nx, ny, nz)));
    }
    None
}

fn parse_v2_line(line: &str) -> Option<Keyframe> {
    let tokens = tokenize(line);
    if tokens.len() != 4 {
        return None;
    }
    let t: f64 = tokens[0].parse().ok()?;
    let pos = parse_position(&tokens[1])?;
    let camrel = match tokens[2].as_str() {
        "abs_rot" => false,
        "camrel_rot" => true,
        _ => return None,
    };
    let mut rot = parse_rotation(&tokens[3])?;
    if camrel {
        rot = camera_facing(pos) * rot;
    }
    Some(Keyframe::new(secs_to_micros(t), pos, rot))
}
