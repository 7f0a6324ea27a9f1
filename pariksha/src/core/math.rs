//! Angle arithmetic and orientation decoding.
//!
//! All functions here are pure; message handlers call them to turn the
//! quaternion orientation of a pose into the single heading angle that
//! ends up in the telemetry tables.

use std::f32::consts::PI;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::Quaternion;

/// Normalize angle to [-π, π].
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Shortest signed angular difference from `a` to `b`.
#[inline]
pub fn angle_diff(a: f32, b: f32) -> f32 {
    normalize_angle(b - a)
}

/// Heading (rotation about +Z) of a quaternion, in [-π, π].
///
/// Uses the yaw term of the Z-Y-X Euler decomposition, so roll and pitch
/// components do not leak into the heading of a level robot. The input
/// does not need to be normalized.
#[inline]
pub fn yaw_from_quaternion(q: &Quaternion) -> f32 {
    let siny_cosp = 2.0 * (q.w * q.z + q.x * q.y);
    let cosy_cosp = q.w * q.w + q.x * q.x - q.y * q.y - q.z * q.z;
    siny_cosp.atan2(cosy_cosp)
}

/// Quaternion for a pure rotation of `yaw` radians about +Z.
#[inline]
pub fn quaternion_from_yaw(yaw: f32) -> Quaternion {
    let (s, c) = (yaw / 2.0).sin_cos();
    Quaternion::new(0.0, 0.0, s, c)
}

/// Wall-clock time in seconds since the Unix epoch.
pub fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
