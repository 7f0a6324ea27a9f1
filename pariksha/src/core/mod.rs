//! Core types and math shared by every layer.

pub mod math;
pub mod types;

pub use math::{angle_diff, epoch_secs, normalize_angle, quaternion_from_yaw, yaw_from_quaternion};
pub use types::{Point2D, Pose2D, Quaternion};
