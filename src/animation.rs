//! Target pose over time.
//!
//! An [`AnimationTrack`] stores keyframes in strictly ascending time order and
//! answers pose queries for arbitrary simulation times. Positions are blended
//! linearly, orientations by spherical linear interpolation along the shorter
//! arc.

use glam::{Quat, Vec3};

/// Below this, angles and axis lengths count as zero and quaternion arcs
/// count as straight.
pub const EPSILON: f32 = 0.0001;

/// A target pose at a point in simulation time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    /// Microseconds.
    pub t: i64,
    /// Meters, camera-relative.
    pub pos: Vec3,
    /// Unit quaternion.
    pub rot: Quat,
}

impl Keyframe {
    pub fn new(t: i64, pos: Vec3, rot: Quat) -> Self {
        Self { t, pos, rot }
    }

    pub fn pose(&self) -> (Vec3, Quat) {
        (self.pos, self.rot)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationTrack {
    keyframes: Vec<Keyframe>,
}

impl AnimationTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in time order. A keyframe with an already present time replaces
    /// the old one; returns `true` in that case.
    pub fn insert(&mut self, keyframe: Keyframe) -> bool {
        match self.keyframes.binary_search_by_key(&keyframe.t, |k| k.t) {
            Ok(i) => {
                self.keyframes[i] = keyframe;
                true
            }
            Err(i) => {
                self.keyframes.insert(i, keyframe);
                false
            }
        }
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// A track can drive the target once it holds at least one keyframe.
    pub fn is_valid(&self) -> bool {
        !self.keyframes.is_empty()
    }

    pub fn start_time(&self) -> i64 {
        self.keyframes.first().map_or(0, |k| k.t)
    }

    pub fn end_time(&self) -> i64 {
        self.keyframes.last().map_or(0, |k| k.t)
    }

    pub fn duration(&self) -> i64 {
        self.end_time() - self.start_time()
    }

    /// Pose at time `t` (microseconds). Clamps outside the keyframe range and
    /// returns keyframe poses unchanged on exact hits. `None` for an empty track.
    pub fn interpolate(&self, t: i64) -> Option<(Vec3, Quat)> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;
        if t <= first.t {
            return Some(first.pose());
        }
        if t >= last.t {
            return Some(last.pose());
        }

        let b = match self.keyframes.binary_search_by_key(&t, |k| k.t) {
            Ok(i) => return Some(self.keyframes[i].pose()),
            Err(i) => i,
        };
        // Clamping above guarantees 0 < b < len.
        let ka = &self.keyframes[b - 1];
        let kb = &self.keyframes[b];
        let alpha = ((kb.t - t) as f64 / (kb.t - ka.t) as f64) as f32;

        let pos = ka.pos * alpha + kb.pos * (1.0 - alpha);
        let rot = slerp(ka.rot, kb.rot, alpha);
        Some((pos, rot))
    }
}

/// Spherical interpolation where `alpha` is the weight of `a`: `alpha = 1`
/// yields `a`, `alpha = 0` yields `b` (up to sign).
pub fn slerp(a: Quat, b: Quat, alpha: f32) -> Quat {
    let mut b = b;
    let mut cos_w = a.dot(b);
    if cos_w < 0.0 {
        cos_w = -cos_w;
        b = -b;
    }
    if 1.0 - cos_w > EPSILON {
        let w = cos_w.min(1.0).acos();
        let sin_w = w.sin();
        let ta = (alpha * w).sin() / sin_w;
        let tb = ((1.0 - alpha) * w).sin() / sin_w;
        a * ta + b * tb
    } else {
        // nearly parallel
        (a * alpha + b * (1.0 - alpha)).normalize()
    }
}

/// Rotation of `angle` radians about `axis`; identity for a vanishing angle
/// or axis.
pub fn angle_axis_to_quat(angle: f32, axis: Vec3) -> Quat {
    let len = axis.length();
    if angle.abs() <= EPSILON || len <= EPSILON {
        return Quat::IDENTITY;
    }
    let (s, c) = (angle / 2.0).sin_cos();
    let n = axis / len;
    Quat::from_xyzw(n.x * s, n.y * s, n.z * s, c)
}

/// Rotation that turns direction `from` onto direction `to`.
pub fn oldnew_to_quat(from: Vec3, to: Vec3) -> Quat {
    let denom = (from.length_squared() * to.length_squared()).sqrt();
    if denom <= EPSILON * EPSILON {
        return Quat::IDENTITY;
    }
    let angle = (from.dot(to) / denom).clamp(-1.0, 1.0).acos();
    angle_axis_to_quat(angle, from.cross(to))
}

/// Rotation that makes a target at `pos` face the camera, i.e. turns the
/// camera's viewing axis (-Z) onto `pos`.
pub fn camera_facing(pos: Vec3) -> Quat {
    oldnew_to_quat(Vec3::NEG_Z, pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kf(t: i64, x: f32, angle_deg: f32) -> Keyframe {
        Keyframe::new(
            t,
            Vec3::new(x, 0.0, -1.0),
            angle_axis_to_quat(angle_deg.to_radians(), Vec3::Y),
        )
    }

    fn track() -> AnimationTrack {
        let mut track = AnimationTrack::new();
        track.insert(kf(0, 0.0, 0.0));
        track.insert(kf(1_000_000, 1.0, 90.0));
        track.insert(kf(3_000_000, -2.0, 45.0));
        track
    }

    #[test]
    fn test_empty_track_has_no_pose() {
        let track = AnimationTrack::new();
        assert!(!track.is_valid());
        assert!(track.interpolate(0).is_none());
    }

    #[test]
    fn test_clamps_to_endpoints() {
        let track = track();
        let first = track.keyframes()[0].pose();
        let last = track.keyframes()[2].pose();
        assert_eq!(track.interpolate(-5).unwrap(), first);
        assert_eq!(track.interpolate(0).unwrap(), first);
        assert_eq!(track.interpolate(3_000_000).unwrap(), last);
        assert_eq!(track.interpolate(9_000_000).unwrap(), last);
    }

    #[test]
    fn test_exact_keyframe_hit() {
        let track = track();
        assert_eq!(
            track.interpolate(1_000_000).unwrap(),
            track.keyframes()[1].pose()
        );
    }

    #[test]
    fn test_midpoint_blend() {
        let track = track();
        let (pos, rot) = track.interpolate(500_000).unwrap();
        assert!((pos.x - 0.5).abs() < 1e-6);
        let expected = angle_axis_to_quat(45f32.to_radians(), Vec3::Y);
        assert!(rot.dot(expected).abs() > 1.0 - 1e-5);
        assert!((rot.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_insert_keeps_order_and_overwrites() {
        let mut track = track();
        assert!(!track.insert(kf(2_000_000, 5.0, 0.0)));
        assert!(track.insert(kf(1_000_000, 7.0, 0.0)));
        let times: Vec<i64> = track.keyframes().iter().map(|k| k.t).collect();
        assert_eq!(times, vec![0, 1_000_000, 2_000_000, 3_000_000]);
        assert_eq!(track.keyframes()[1].pos.x, 7.0);
        assert_eq!(track.duration(), 3_000_000);
    }

    #[test]
    fn test_slerp_endpoints_and_norm() {
        let a = angle_axis_to_quat(0.3, Vec3::new(1.0, 2.0, 0.5));
        let b = angle_axis_to_quat(2.1, Vec3::new(-0.4, 1.0, 0.0));
        assert!(slerp(a, b, 1.0).dot(a).abs() > 1.0 - 1e-5);
        assert!(slerp(a, b, 0.0).dot(b).abs() > 1.0 - 1e-5);
        for i in 0..=10 {
            let q = slerp(a, b, i as f32 / 10.0);
            assert!((q.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_slerp_takes_short_arc() {
        let a = angle_axis_to_quat(0.2, Vec3::Z);
        let b = -angle_axis_to_quat(0.4, Vec3::Z);
        let q = slerp(a, b, 0.5);
        let expected = angle_axis_to_quat(0.3, Vec3::Z);
        assert!(q.dot(expected).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_slerp_nearly_equal_falls_back() {
        let a = angle_axis_to_quat(0.001, Vec3::X);
        let q = slerp(a, a, 0.25);
        assert!(q.is_finite());
        assert!((q.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_angle_axis_identity_cases() {
        assert_eq!(angle_axis_to_quat(0.0, Vec3::X), Quat::IDENTITY);
        assert_eq!(angle_axis_to_quat(1.0, Vec3::ZERO), Quat::IDENTITY);
    }

    #[test]
    fn test_oldnew_rotates_from_onto_to() {
        let q = oldnew_to_quat(Vec3::X, Vec3::Y);
        let v = q * Vec3::X;
        assert!((v - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_camera_facing() {
        let pos = Vec3::new(0.3, 0.0, -1.0);
        let q = camera_facing(pos);
        let v = q * Vec3::NEG_Z;
        assert!((v - pos.normalize()).length() < 1e-5);
        assert_eq!(camera_facing(Vec3::new(0.0, 0.0, -2.0)), Quat::IDENTITY);
    }
}
