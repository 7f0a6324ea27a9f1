//! Inbound observation messages.
//!
//! Transport-neutral mirrors of the scan, particle cloud, pose correction,
//! odometry and transform messages a localization stack publishes.

use crate::core::{Point2D, Pose2D, Quaternion, yaw_from_quaternion};

/// Message header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    /// Seconds since the Unix epoch.
    pub stamp: f64,
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: f64, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// Planar position with a full orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseMsg {
    pub position: Point2D,
    pub orientation: Quaternion,
}

impl PoseMsg {
    pub fn new(position: Point2D, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Planar pose with the heading decoded from the orientation.
    pub fn to_pose2d(&self) -> Pose2D {
        Pose2D::new(
            self.position.x,
            self.position.y,
            yaw_from_quaternion(&self.orientation),
        )
    }
}

impl From<Pose2D> for PoseMsg {
    fn from(pose: Pose2D) -> Self {
        Self {
            position: pose.position(),
            orientation: crate::core::quaternion_from_yaw(pose.theta),
        }
    }
}

/// Laser scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanMsg {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
}

impl ScanMsg {
    /// `t, angle_min, angle_max, angle_increment, range_min, range_max, r1, r2, ...`
    pub fn to_csv_line(&self) -> String {
        let ranges: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        format!(
            "{}, {}, {}, {}, {}, {}, {}",
            self.header.stamp,
            self.angle_min,
            self.angle_max,
            self.angle_increment,
            self.range_min,
            self.range_max,
            ranges.join(", ")
        )
    }
}

/// Particle set of a particle-filter localizer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticleCloudMsg {
    pub header: Header,
    pub poses: Vec<PoseMsg>,
}

impl ParticleCloudMsg {
    /// `t, frame_id, n, x1, y1, theta1, x2, ...`
    pub fn to_csv_line(&self) -> String {
        let poses: Vec<String> = self
            .poses
            .iter()
            .map(|p| {
                format!(
                    "{}, {}, {}",
                    p.position.x,
                    p.position.y,
                    yaw_from_quaternion(&p.orientation)
                )
            })
            .collect();
        format!(
            "{}, {}, {}, {}",
            self.header.stamp,
            self.header.frame_id,
            self.poses.len(),
            poses.join(", ")
        )
    }
}

/// Pose estimate with a row-major 6x6 covariance over (x, y, z, roll, pitch, yaw).
#[derive(Debug, Clone, PartialEq)]
pub struct PoseWithCovarianceMsg {
    pub header: Header,
    pub pose: PoseMsg,
    pub covariance: [f64; 36],
}

impl PoseWithCovarianceMsg {
    /// Covariance entry at (row, col).
    pub fn covariance_at(&self, row: usize, col: usize) -> f64 {
        self.covariance[row * 6 + col]
    }

    /// `t, x, y, theta, cov_x_x, cov_x_y, cov_y_y, cov_theta_theta`
    pub fn to_row(&self) -> Vec<f64> {
        let pose = self.pose.to_pose2d();
        vec![
            self.header.stamp,
            widen(pose.x),
            widen(pose.y),
            widen(pose.theta),
            self.covariance_at(0, 0),
            self.covariance_at(0, 1),
            self.covariance_at(1, 1),
            self.covariance_at(5, 5),
        ]
    }
}

/// Ground-truth odometry: pose and body velocities.
#[derive(Debug, Clone, PartialEq)]
pub struct OdometryMsg {
    pub header: Header,
    pub pose: PoseMsg,
    pub linear_x: f32,
    pub linear_y: f32,
    pub angular_z: f32,
}

impl OdometryMsg {
    /// `t, x, y, theta, v_x, v_y, v_theta`
    pub fn to_row(&self) -> Vec<f64> {
        let pose = self.pose.to_pose2d();
        vec![
            self.header.stamp,
            widen(pose.x),
            widen(pose.y),
            widen(pose.theta),
            widen(self.linear_x),
            widen(self.linear_y),
            widen(self.angular_z),
        ]
    }
}

/// Transform of `child_frame_id` expressed in `header.frame_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    pub header: Header,
    pub child_frame_id: String,
    pub translation: Point2D,
    pub rotation: Quaternion,
}

impl StampedTransform {
    /// `t, x, y, theta`
    pub fn to_row(&self) -> Vec<f64> {
        vec![
            self.header.stamp,
            widen(self.translation.x),
            widen(self.translation.y),
            widen(yaw_from_quaternion(&self.rotation)),
        ]
    }
}

/// Widen through the shortest decimal form, so 1.1f32 becomes 1.1f64
/// rather than 1.100000023841858.
fn widen(v: f32) -> f64 {
    v.to_string().parse().unwrap_or(v as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quaternion_from_yaw;
    use approx::assert_relative_eq;

    #[test]
    fn test_scan_line() {
        let scan = ScanMsg {
            header: Header::new(10.5, "base_scan"),
            angle_min: -1.5,
            angle_max: 1.5,
            angle_increment: 0.5,
            range_min: 0.1,
            range_max: 30.0,
            ranges: vec![1.0, 2.5, f32::INFINITY],
        };
        assert_eq!(scan.to_csv_line(), "10.5, -1.5, 1.5, 0.5, 0.1, 30, 1, 2.5, inf");
    }

    #[test]
    fn test_particle_line_decodes_heading() {
        let cloud = ParticleCloudMsg {
            header: Header::new(3.0, "map"),
            poses: vec![
                PoseMsg::new(Point2D::new(1.0, 2.0), quaternion_from_yaw(0.0)),
                PoseMsg::new(Point2D::new(-1.0, 0.5), quaternion_from_yaw(0.0)),
            ],
        };
        assert_eq!(cloud.to_csv_line(), "3, map, 2, 1, 2, 0, -1, 0.5, 0");
    }

    #[test]
    fn test_correction_covariance_indices() {
        let mut covariance = [0.0; 36];
        for (i, c) in covariance.iter_mut().enumerate() {
            *c = i as f64;
        }
        let msg = PoseWithCovarianceMsg {
            header: Header::new(1.0, "map"),
            pose: PoseMsg::new(Point2D::new(0.5, 0.25), quaternion_from_yaw(1.0)),
            covariance,
        };

        let row = msg.to_row();
        assert_eq!(row.len(), 8);
        assert_relative_eq!(row[3], 1.0, epsilon = 1e-5);
        assert_eq!(&row[4..], &[0.0, 1.0, 7.0, 35.0]);
    }

    #[test]
    fn test_ground_truth_row_keeps_decimal_values() {
        let msg = OdometryMsg {
            header: Header::new(2.0, "map"),
            pose: PoseMsg::new(Point2D::new(1.1, -0.3), quaternion_from_yaw(0.0)),
            linear_x: 0.1,
            linear_y: 0.0,
            angular_z: -0.7,
        };
        let row = msg.to_row();
        assert_eq!(&row[1..3], &[1.1, -0.3]);
        assert_eq!(&row[4..], &[0.1, 0.0, -0.7]);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ground_truth_poses.csv");
        let mut table = crate::telemetry::PoseTable::ground_truth_poses();
        table.push(row);
        table.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().nth(1), Some("2,1.1,-0.3,0,0.1,0,-0.7"));
        let back = crate::telemetry::PoseTable::read_csv(&path).unwrap();
        assert_eq!(back.rows()[0][1], 1.1);
    }

    #[test]
    fn test_pose_msg_round_trip_heading() {
        let pose = Pose2D::new(1.0, -2.0, -2.5);
        let back = PoseMsg::from(pose).to_pose2d();
        assert_relative_eq!(back.theta, pose.theta, epsilon = 1e-5);
        assert_eq!(back.position(), pose.position());
    }
}
