//! Configuration loading for Pariksha

use crate::error::{ParikshaError, Result};
use crate::navigation::DispatchConfig;
use crate::telemetry::EstimatedPoseConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ParikshaConfig {
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Names of the observation streams and the navigation action
#[derive(Clone, Debug, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_scan_topic")]
    pub scan_topic: String,

    #[serde(default = "default_amcl_particles_topic")]
    pub amcl_particles_topic: String,

    #[serde(default = "default_ground_truth_pose_topic")]
    pub ground_truth_pose_topic: String,

    #[serde(default = "default_estimated_pose_correction_topic")]
    pub estimated_pose_correction_topic: String,

    #[serde(default = "default_navigate_to_pose_action")]
    pub navigate_to_pose_action: String,

    /// Capacity of each telemetry channel (default: 1, newest wins)
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Coordinate frames
#[derive(Clone, Debug, Deserialize)]
pub struct FramesConfig {
    /// Frame of goals and estimated poses (default: map)
    #[serde(default = "default_fixed_frame")]
    pub fixed_frame: String,

    /// Robot body frame (default: base_link)
    #[serde(default = "default_robot_base_frame")]
    pub robot_base_frame: String,
}

/// Run parameters
#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    /// Whole-run timeout in seconds (default: 3600)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: f64,

    /// Timeout for a single waypoint in seconds (default: 180)
    #[serde(default = "default_waypoint_timeout")]
    pub waypoint_timeout_secs: f64,

    /// Process snapshot period in seconds (default: 1.0)
    #[serde(default = "default_ps_snapshot_period")]
    pub ps_snapshot_period_secs: f64,

    /// Estimated pose sampling period in seconds (default: 0.1)
    #[serde(default = "default_write_estimated_poses_period")]
    pub write_estimated_poses_period_secs: f64,

    /// Ground-truth distance below which a goal counts as reached (meters)
    #[serde(default = "default_goal_tolerance")]
    pub goal_tolerance: f32,

    /// Standard deviation of the initial pose position (meters)
    #[serde(default = "default_initial_pose_std_xy")]
    pub initial_pose_std_xy: f32,

    /// Standard deviation of the initial pose heading (radians)
    #[serde(default = "default_initial_pose_std_theta")]
    pub initial_pose_std_theta: f32,

    /// Robot radius (meters); skeleton vertices need twice this clearance
    #[serde(default = "default_robot_radius")]
    pub robot_radius: f32,

    /// Name of the robot entity in the simulator
    #[serde(default = "default_robot_entity_name")]
    pub robot_entity_name: String,

    /// Root of the process tree to snapshot (default: this process)
    #[serde(default)]
    pub tracked_root_pid: Option<u32>,

    /// Pause after each goal result in seconds (default: 1.0)
    #[serde(default = "default_goal_settle")]
    pub goal_settle_secs: f64,

    /// Wait for the navigation server before each goal in seconds (default: 5.0)
    #[serde(default = "default_server_wait")]
    pub server_wait_secs: f64,

    /// Seed for tour planning; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Output configuration
#[derive(Clone, Debug, Deserialize)]
pub struct OutputConfig {
    /// Folder receiving `benchmark_data/`
    #[serde(default = "default_run_output_folder")]
    pub run_output_folder: PathBuf,

    /// Skeleton graph JSON; the built-in demo skeleton is used when unset
    #[serde(default)]
    pub skeleton_path: Option<PathBuf>,
}

/// Simulated environment used by the binary
#[derive(Clone, Debug, Deserialize)]
pub struct SimConfig {
    /// Robot speed in m/s (default: 2.0)
    #[serde(default = "default_sim_speed")]
    pub speed: f32,

    /// Telemetry publish rate in Hz (default: 20)
    #[serde(default = "default_sim_rate")]
    pub publish_rate_hz: f32,

    /// Probability that a goal ends aborted (default: 0.1)
    #[serde(default = "default_sim_abort_probability")]
    pub abort_probability: f32,

    /// Number of particles in the simulated particle set (default: 50)
    #[serde(default = "default_sim_particles")]
    pub particles: usize,

    /// Number of beams per simulated scan (default: 90)
    #[serde(default = "default_sim_beams")]
    pub scan_beams: usize,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            scan_topic: default_scan_topic(),
            amcl_particles_topic: default_amcl_particles_topic(),
            ground_truth_pose_topic: default_ground_truth_pose_topic(),
            estimated_pose_correction_topic: default_estimated_pose_correction_topic(),
            navigate_to_pose_action: default_navigate_to_pose_action(),
            queue_size: default_queue_size(),
        }
    }
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            fixed_frame: default_fixed_frame(),
            robot_base_frame: default_robot_base_frame(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            waypoint_timeout_secs: default_waypoint_timeout(),
            ps_snapshot_period_secs: default_ps_snapshot_period(),
            write_estimated_poses_period_secs: default_write_estimated_poses_period(),
            goal_tolerance: default_goal_tolerance(),
            initial_pose_std_xy: default_initial_pose_std_xy(),
            initial_pose_std_theta: default_initial_pose_std_theta(),
            robot_radius: default_robot_radius(),
            robot_entity_name: default_robot_entity_name(),
            tracked_root_pid: None,
            goal_settle_secs: default_goal_settle(),
            server_wait_secs: default_server_wait(),
            seed: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            run_output_folder: default_run_output_folder(),
            skeleton_path: None,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speed: default_sim_speed(),
            publish_rate_hz: default_sim_rate(),
            abort_probability: default_sim_abort_probability(),
            particles: default_sim_particles(),
            scan_beams: default_sim_beams(),
        }
    }
}

// Default value functions
fn default_scan_topic() -> String {
    "/scan".to_string()
}
fn default_amcl_particles_topic() -> String {
    "/particlecloud".to_string()
}
fn default_ground_truth_pose_topic() -> String {
    "/ground_truth/odom".to_string()
}
fn default_estimated_pose_correction_topic() -> String {
    "/amcl_pose".to_string()
}
fn default_navigate_to_pose_action() -> String {
    "/move_base".to_string()
}
fn default_queue_size() -> usize {
    1
}
fn default_fixed_frame() -> String {
    "map".to_string()
}
fn default_robot_base_frame() -> String {
    "base_link".to_string()
}

// Run defaults
fn default_run_timeout() -> f64 {
    3600.0
}
fn default_waypoint_timeout() -> f64 {
    180.0
}
fn default_ps_snapshot_period() -> f64 {
    1.0
}
fn default_write_estimated_poses_period() -> f64 {
    0.1
}
fn default_goal_tolerance() -> f32 {
    0.2
}
fn default_initial_pose_std_xy() -> f32 {
    0.1
}
fn default_initial_pose_std_theta() -> f32 {
    0.087
} // ~5°
fn default_robot_radius() -> f32 {
    0.2
}
fn default_robot_entity_name() -> String {
    "robot".to_string()
}
fn default_goal_settle() -> f64 {
    1.0
}
fn default_server_wait() -> f64 {
    5.0
}
fn default_run_output_folder() -> PathBuf {
    PathBuf::from("output/run")
}

// Simulation defaults
fn default_sim_speed() -> f32 {
    2.0
}
fn default_sim_rate() -> f32 {
    20.0
}
fn default_sim_abort_probability() -> f32 {
    0.1
}
fn default_sim_particles() -> usize {
    50
}
fn default_sim_beams() -> usize {
    90
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl ParikshaConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ParikshaError::Config(format!("Failed to read config file: {}", e)))?;
        let config: ParikshaConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("run.run_timeout_secs", self.run.run_timeout_secs),
            ("run.waypoint_timeout_secs", self.run.waypoint_timeout_secs),
            ("run.ps_snapshot_period_secs", self.run.ps_snapshot_period_secs),
            (
                "run.write_estimated_poses_period_secs",
                self.run.write_estimated_poses_period_secs,
            ),
        ];
        for (name, value) in periods {
            if !(value.is_finite() && value > 0.0) {
                return Err(ParikshaError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.run.goal_tolerance <= 0.0 {
            return Err(ParikshaError::Config(
                "run.goal_tolerance must be positive".to_string(),
            ));
        }
        if self.streams.queue_size == 0 {
            return Err(ParikshaError::Config(
                "streams.queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum skeleton clearance for tour vertices
    pub fn minimum_clearance(&self) -> f32 {
        2.0 * self.run.robot_radius
    }

    pub fn run_timeout(&self) -> Duration {
        secs(self.run.run_timeout_secs)
    }

    pub fn ps_snapshot_period(&self) -> Duration {
        secs(self.run.ps_snapshot_period_secs)
    }

    /// Dispatcher settings derived from the run section
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            fixed_frame: self.frames.fixed_frame.clone(),
            waypoint_timeout: secs(self.run.waypoint_timeout_secs),
            server_wait: secs(self.run.server_wait_secs),
            settle: secs(self.run.goal_settle_secs),
            goal_tolerance: self.run.goal_tolerance,
            ..DispatchConfig::default()
        }
    }

    /// Estimated-pose recorder settings
    pub fn estimated_pose(&self) -> EstimatedPoseConfig {
        EstimatedPoseConfig {
            fixed_frame: self.frames.fixed_frame.clone(),
            robot_base_frame: self.frames.robot_base_frame.clone(),
            period: secs(self.run.write_estimated_poses_period_secs),
        }
    }
}
