//! Navigation action client interface.
//!
//! The supervisor never plans or executes paths itself; it hands one goal
//! at a time to a navigation server and waits for a terminal status.

use std::time::Duration;

use thiserror::Error;

use crate::core::{Pose2D, Quaternion, quaternion_from_yaw};

/// Terminal status of a navigation goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Succeeded,
    Aborted,
    Rejected,
    Preempted,
    Recalled,
    Lost,
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GoalStatus::Succeeded => "SUCCEEDED",
            GoalStatus::Aborted => "ABORTED",
            GoalStatus::Rejected => "REJECTED",
            GoalStatus::Preempted => "PREEMPTED",
            GoalStatus::Recalled => "RECALLED",
            GoalStatus::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// A target pose in the fixed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct NavGoal {
    pub frame_id: String,
    /// Send time, seconds since the Unix epoch.
    pub stamp: f64,
    pub pose: Pose2D,
}

impl NavGoal {
    pub fn new(frame_id: impl Into<String>, stamp: f64, pose: Pose2D) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
            pose,
        }
    }

    /// Goal heading as a quaternion about +Z.
    pub fn orientation(&self) -> Quaternion {
        quaternion_from_yaw(self.pose.theta)
    }
}

/// Navigation client errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    #[error("navigation server not available")]
    ServerUnavailable,

    #[error("goal rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Client side of a navigate-to-pose action.
pub trait NavigationClient: Send {
    /// Block until the server is reachable, up to `timeout`.
    fn wait_for_server(&mut self, timeout: Duration) -> bool;

    /// Send a new goal. The previous goal, if any, is superseded.
    fn send_goal(&mut self, goal: &NavGoal) -> Result<(), NavigationError>;

    /// Block up to `timeout` for the terminal status of the current goal.
    ///
    /// `None` means no result yet; the goal keeps running.
    fn wait_for_result(&mut self, timeout: Duration) -> Option<GoalStatus>;

    /// Human-readable detail for the last terminal status.
    fn goal_status_text(&self) -> String;
}

impl<C: NavigationClient + ?Sized> NavigationClient for Box<C> {
    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        (**self).wait_for_server(timeout)
    }

    fn send_goal(&mut self, goal: &NavGoal) -> Result<(), NavigationError> {
        (**self).send_goal(goal)
    }

    fn wait_for_result(&mut self, timeout: Duration) -> Option<GoalStatus> {
        (**self).wait_for_result(timeout)
    }

    fn goal_status_text(&self) -> String {
        (**self).goal_status_text()
    }
}
