//! Run event ledger (`run_events.csv`).

use std::io;
use std::str::FromStr;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::epoch_secs;
use crate::telemetry::writer::{LineWriter, backup_file_if_exists};

/// Header line of the ledger.
pub const EVENTS_HEADER: &str = "timestamp, event";

/// Lifecycle events of a benchmark run.
///
/// The names are the ledger vocabulary consumed by downstream analysis and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunEvent {
    RunStart,
    TargetPoseSet,
    TargetPoseReached,
    TargetPoseNotReached,
    TargetPoseRejected,
    RunCompleted,
    WaypointTimeout,
    RunTimeout,
    RosShutdown,
    SupervisorFinished,
    FailedToCommunicateWithNavigationNode,
    InsufficientNumberOfPosesInTraversalPath,
    InsufficientNumberOfNodesInDeleavedReducedVoronoiGraph,
}

impl RunEvent {
    /// Every event, in declaration order.
    pub const ALL: [RunEvent; 13] = [
        RunEvent::RunStart,
        RunEvent::TargetPoseSet,
        RunEvent::TargetPoseReached,
        RunEvent::TargetPoseNotReached,
        RunEvent::TargetPoseRejected,
        RunEvent::RunCompleted,
        RunEvent::WaypointTimeout,
        RunEvent::RunTimeout,
        RunEvent::RosShutdown,
        RunEvent::SupervisorFinished,
        RunEvent::FailedToCommunicateWithNavigationNode,
        RunEvent::InsufficientNumberOfPosesInTraversalPath,
        RunEvent::InsufficientNumberOfNodesInDeleavedReducedVoronoiGraph,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::RunStart => "run_start",
            RunEvent::TargetPoseSet => "target_pose_set",
            RunEvent::TargetPoseReached => "target_pose_reached",
            RunEvent::TargetPoseNotReached => "target_pose_not_reached",
            RunEvent::TargetPoseRejected => "target_pose_rejected",
            RunEvent::RunCompleted => "run_completed",
            RunEvent::WaypointTimeout => "waypoint_timeout",
            RunEvent::RunTimeout => "run_timeout",
            RunEvent::RosShutdown => "ros_shutdown",
            RunEvent::SupervisorFinished => "supervisor_finished",
            RunEvent::FailedToCommunicateWithNavigationNode => {
                "failed_to_communicate_with_navigation_node"
            }
            RunEvent::InsufficientNumberOfPosesInTraversalPath => {
                "insufficient_number_of_poses_in_traversal_path"
            }
            RunEvent::InsufficientNumberOfNodesInDeleavedReducedVoronoiGraph => {
                "insufficient_number_of_nodes_in_deleaved_reduced_voronoi_graph"
            }
        }
    }
}

impl std::fmt::Display for RunEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RunEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunEvent::ALL
            .into_iter()
            .find(|e| e.name() == s.trim())
            .ok_or_else(|| format!("unknown run event {:?}", s))
    }
}

/// Append-only, timestamped event ledger.
///
/// Writes from the dispatcher, the watchdog and the interrupt handler are
/// serialized through one lock, so lines never interleave.
#[derive(Debug)]
pub struct RunEventLog {
    writer: LineWriter,
    write_lock: Mutex<()>,
}

impl RunEventLog {
    /// Back up any previous ledger at `path` and start a new one.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(backup) = backup_file_if_exists(&path)? {
            tracing::info!("Previous run events moved to {:?}", backup);
        }

        // A missing header is logged, events are still appended
        let writer = match LineWriter::create_with_header(&path, EVENTS_HEADER) {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!("Could not write header to {:?}: {}", path, e);
                LineWriter::new(path)
            }
        };

        Ok(Self {
            writer,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Record an event stamped with the current wall-clock time.
    pub fn write(&self, event: RunEvent) {
        self.write_at(epoch_secs(), event);
    }

    /// Record an event with an explicit timestamp (seconds).
    pub fn write_at(&self, t: f64, event: RunEvent) {
        let _guard = self.write_lock.lock();
        tracing::info!("t: {}, event: {}", t, event);

        if let Err(e) = self.writer.append_line(&format!("{}, {}", t, event)) {
            tracing::error!(
                "Could not write event to {:?}: {} {} ({})",
                self.writer.path(),
                t,
                event,
                e
            );
        }
    }

    /// Events written so far, parsed back from the ledger file.
    #[cfg(test)]
    pub(crate) fn events(&self) -> Vec<RunEvent> {
        std::fs::read_to_string(self.path())
            .unwrap_or_default()
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(", "))
            .filter_map(|(_, name)| name.parse().ok())
            .collect()
    }
}
