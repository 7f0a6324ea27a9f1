//! Run Lifecycle Tests
//!
//! Full benchmark runs against fake and simulated collaborators, checking
//! the event ledger, termination arbitration and finalization for every
//! way a run can end:
//!
//! | Scenario | Last events | Termination |
//! |----------|-------------|-------------|
//! | Tour completed | `run_completed` | Completed |
//! | Goal never finishes | `waypoint_timeout, supervisor_finished` | WaypointTimeout |
//! | Run too long | `run_timeout, supervisor_finished` | RunTimeout |
//! | Ctrl-C | `ros_shutdown, supervisor_finished` | Interrupted |
//! | Degenerate skeleton | `insufficient_number_of_nodes_...` | PlanningFailed |
//! | No navigation server | `failed_to_communicate_...` | NavigationUnavailable |
//!
//! Run with: `cargo test --test run_lifecycle`

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use pariksha::config::SimConfig;
use pariksha::core::{Point2D, Pose2D, quaternion_from_yaw};
use pariksha::navigation::{GoalStatus, NavGoal, NavigationClient, NavigationError};
use pariksha::planning::{Edge, SkeletonGraph, Tour, Vertex};
use pariksha::sim::{LocalizationNoise, SimulatedRobot};
use pariksha::supervisor::{EVENTS_HEADER, RunEvent, TourPublisher};
use pariksha::telemetry::{
    Header, PoseTable, RunPaths, ScanMsg, StampedTransform, TelemetryChannels, TransformError,
    TransformSource, decode_snapshot, telemetry_channels,
};
use pariksha::{ParikshaConfig, RunController, RunEnvironment, RunOutcome, Termination};

// ============================================================================
// Fake collaborators
// ============================================================================

/// Navigation server that accepts goals and never finishes them.
struct StuckNavigation {
    online: bool,
}

impl NavigationClient for StuckNavigation {
    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        if !self.online {
            std::thread::sleep(timeout);
        }
        self.online
    }

    fn send_goal(&mut self, _goal: &NavGoal) -> Result<(), NavigationError> {
        Ok(())
    }

    fn wait_for_result(&mut self, timeout: Duration) -> Option<GoalStatus> {
        std::thread::sleep(timeout);
        None
    }

    fn goal_status_text(&self) -> String {
        String::new()
    }
}

struct FixedTransform;

impl TransformSource for FixedTransform {
    fn lookup_transform(
        &self,
        target: &str,
        source: &str,
    ) -> Result<StampedTransform, TransformError> {
        Ok(StampedTransform {
            header: Header::new(1.0, target),
            child_frame_id: source.to_string(),
            translation: Point2D::new(0.5, 0.5),
            rotation: quaternion_from_yaw(0.0),
        })
    }
}

#[derive(Default)]
struct RecordingPublisher {
    tours: Mutex<Vec<usize>>,
}

impl TourPublisher for RecordingPublisher {
    fn publish_tour(&self, _frame_id: &str, tour: &Tour) {
        self.tours.lock().push(tour.len());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(dir: &TempDir) -> ParikshaConfig {
    let mut config = ParikshaConfig::default();
    config.output.run_output_folder = dir.path().to_path_buf();
    config.run.seed = Some(3);
    config.run.run_timeout_secs = 30.0;
    config.run.waypoint_timeout_secs = 5.0;
    config.run.goal_settle_secs = 0.0;
    config.run.server_wait_secs = 0.3;
    config.run.goal_tolerance = 0.5;
    config.run.ps_snapshot_period_secs = 0.05;
    config.run.write_estimated_poses_period_secs = 0.02;
    config.run.robot_radius = 0.1;
    config.streams.queue_size = 8;
    config
}

/// Corridor of `n` vertices, 0.5 m apart.
fn corridor(n: u32) -> SkeletonGraph {
    let vertices = (0..n)
        .map(|i| Vertex::new(i, 1.0 + 0.5 * i as f32, 1.0))
        .collect();
    let edges = (1..n).map(|i| Edge::new(i - 1, i, 0.5)).collect();
    SkeletonGraph::new(vertices, edges).unwrap()
}

fn send_scan(channels: &TelemetryChannels) {
    channels
        .scans
        .send(ScanMsg {
            header: Header::new(0.5, "base_scan"),
            ranges: vec![1.0; 4],
            ..Default::default()
        })
        .unwrap();
}

/// Run with a stuck navigation server and the given skeleton.
fn run_stuck(
    config: ParikshaConfig,
    skeleton: SkeletonGraph,
    online: bool,
    with_scan: bool,
) -> (RunOutcome, RunPaths, Arc<RecordingPublisher>) {
    let (channels, receivers) = telemetry_channels(config.streams.queue_size);
    if with_scan {
        send_scan(&channels);
    }
    let publisher = Arc::new(RecordingPublisher::default());
    let controller = RunController::new(config).unwrap();
    let paths = controller.paths().clone();

    let outcome = controller
        .run(RunEnvironment {
            navigation: StuckNavigation { online },
            skeleton,
            transforms: Arc::new(FixedTransform),
            publisher: publisher.clone(),
            receivers,
        })
        .unwrap();
    drop(channels);

    (outcome, paths, publisher)
}

/// Event names as written in the ledger, header checked and stripped.
fn ledger(paths: &RunPaths) -> Vec<String> {
    let content = fs::read_to_string(paths.run_events()).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some(EVENTS_HEADER));
    lines
        .map(|l| {
            let (t, event) = l.split_once(", ").unwrap();
            assert!(t.parse::<f64>().is_ok(), "bad timestamp in {:?}", l);
            event.to_string()
        })
        .collect()
}

fn count(events: &[String], event: RunEvent) -> usize {
    events.iter().filter(|e| *e == event.name()).count()
}

fn assert_finalized(paths: &RunPaths, outcome: &RunOutcome) {
    assert_eq!(outcome.finalizations, 1);
    for (path, header) in [
        (paths.estimated_poses(), "t,x,y,theta"),
        (
            paths.estimated_correction_poses(),
            "t,x,y,theta,cov_x_x,cov_x_y,cov_y_y,cov_theta_theta",
        ),
        (paths.ground_truth_poses(), "t,x,y,theta,v_x,v_y,v_theta"),
    ] {
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some(header), "{:?}", path);
        assert_eq!(content.matches(header).count(), 1, "{:?}", path);
    }
}

fn snapshot_files(folder: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(folder)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Termination paths
// ============================================================================

#[test]
fn test_completed_run_with_simulated_robot() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.sim = SimConfig {
        speed: 10.0,
        publish_rate_hz: 100.0,
        abort_probability: 0.0,
        particles: 5,
        scan_beams: 8,
    };

    let robot = SimulatedRobot::new(
        config.sim.clone(),
        LocalizationNoise {
            std_xy: 0.05,
            std_theta: 0.02,
        },
        "map",
        "base_link",
        Pose2D::new(1.0, 1.0, 0.0),
        11,
    );
    let (channels, receivers) = telemetry_channels(config.streams.queue_size);
    let controller = RunController::new(config).unwrap();
    let paths = controller.paths().clone();
    let sim = robot.spawn_publisher(channels, controller.context().shutdown_signal());

    let outcome = controller
        .run(RunEnvironment {
            navigation: robot.clone(),
            skeleton: corridor(5),
            transforms: Arc::new(robot.clone()),
            publisher: Arc::new(robot.clone()),
            receivers,
        })
        .unwrap();
    sim.join().unwrap();

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.num_goals, 5);
    assert_eq!(outcome.counters.sent, 5);
    assert_eq!(
        outcome.counters.sent,
        outcome.counters.succeeded + outcome.counters.failed
    );
    assert_eq!(robot.published_tour().map(|t| t.len()), Some(5));

    let events = ledger(&paths);
    assert_eq!(events.first().map(String::as_str), Some("run_start"));
    assert_eq!(events.last().map(String::as_str), Some("run_completed"));
    assert_eq!(count(&events, RunEvent::TargetPoseSet), 5);
    assert_eq!(
        count(&events, RunEvent::TargetPoseReached) + count(&events, RunEvent::TargetPoseNotReached),
        5
    );
    assert_eq!(count(&events, RunEvent::SupervisorFinished), 0);

    // Buffered tables match what the recorders reported
    assert_finalized(&paths, &outcome);
    let ground_truth = PoseTable::read_csv(&paths.ground_truth_poses()).unwrap();
    assert_eq!(ground_truth.len(), outcome.ground_truth_poses);
    assert!(!ground_truth.is_empty());
    let corrections = PoseTable::read_csv(&paths.estimated_correction_poses()).unwrap();
    assert_eq!(corrections.len(), outcome.correction_poses);
    let estimated = PoseTable::read_csv(&paths.estimated_poses()).unwrap();
    assert_eq!(estimated.len(), outcome.estimated_poses);

    // Line streams only contain post-start observations
    let scans = fs::read_to_string(paths.scans()).unwrap();
    assert!(scans.lines().all(|l| l.split(", ").count() == 6 + 8));
    let particles = fs::read_to_string(paths.amcl_particles()).unwrap();
    assert!(particles.lines().all(|l| l.split(", ").count() == 3 + 3 * 5));
}

#[test]
fn test_waypoint_timeout_ends_run() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.run.waypoint_timeout_secs = 0.3;

    let (outcome, paths, publisher) = run_stuck(config, corridor(4), true, true);

    assert_eq!(outcome.termination, Termination::WaypointTimeout);
    assert_eq!(outcome.counters.sent, 1);
    assert_eq!(*publisher.tours.lock(), vec![4]);
    assert_eq!(
        ledger(&paths),
        vec![
            "run_start",
            "target_pose_set",
            "waypoint_timeout",
            "supervisor_finished"
        ]
    );
    assert_finalized(&paths, &outcome);
}

#[test]
fn test_run_timeout_preempts_waypoint() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.run.run_timeout_secs = 0.5;
    config.run.waypoint_timeout_secs = 60.0;

    let start = Instant::now();
    let (outcome, paths, _) = run_stuck(config, corridor(4), true, true);

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.termination, Termination::RunTimeout);

    let events = ledger(&paths);
    assert_eq!(
        &events[events.len() - 2..],
        &["run_timeout", "supervisor_finished"]
    );
    assert_eq!(count(&events, RunEvent::SupervisorFinished), 1);
    assert_eq!(count(&events, RunEvent::WaypointTimeout), 0);
    assert_finalized(&paths, &outcome);
}

#[test]
fn test_interrupt_during_first_scan_wait() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (_channels, receivers) = telemetry_channels(config.streams.queue_size);
    let controller = RunController::new(config).unwrap();
    let paths = controller.paths().clone();
    let ctx = controller.context();
    let interrupt = controller.interrupt_handle();

    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        interrupt.interrupt()
    });

    let outcome = controller
        .run(RunEnvironment {
            navigation: StuckNavigation { online: true },
            skeleton: corridor(3),
            transforms: Arc::new(FixedTransform),
            publisher: Arc::new(RecordingPublisher::default()),
            receivers,
        })
        .unwrap();

    assert!(interrupter.join().unwrap());
    assert_eq!(outcome.termination, Termination::Interrupted);
    assert_eq!(outcome.num_goals, 0);
    assert_eq!(ledger(&paths), vec!["ros_shutdown", "supervisor_finished"]);
    assert_eq!(ctx.finalizations(), 1);
    assert_finalized(&paths, &outcome);
    assert!(!paths.scans().exists());
}

#[test]
fn test_insufficient_nodes_sends_no_goal() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // Only singleton components
    let skeleton = SkeletonGraph::new(
        vec![Vertex::new(0, 0.0, 0.0), Vertex::new(1, 5.0, 5.0)],
        vec![],
    )
    .unwrap();

    let (outcome, paths, publisher) = run_stuck(config, skeleton, true, true);

    assert_eq!(outcome.termination, Termination::PlanningFailed);
    assert_eq!(outcome.counters.sent, 0);
    assert!(publisher.tours.lock().is_empty());
    assert_eq!(
        ledger(&paths),
        vec!["insufficient_number_of_nodes_in_deleaved_reduced_voronoi_graph"]
    );
    assert_finalized(&paths, &outcome);
}

#[test]
fn test_navigation_server_unavailable() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let (outcome, paths, _) = run_stuck(config, corridor(3), false, true);

    assert_eq!(outcome.termination, Termination::NavigationUnavailable);
    assert_eq!(outcome.counters.sent, 0);
    assert_eq!(
        ledger(&paths),
        vec!["run_start", "failed_to_communicate_with_navigation_node"]
    );
    assert_finalized(&paths, &outcome);
}

#[test]
fn test_unusable_snapshot_folder_still_finalizes() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.run.waypoint_timeout_secs = 0.3;

    let (channels, receivers) = telemetry_channels(config.streams.queue_size);
    send_scan(&channels);
    let controller = RunController::new(config).unwrap();
    let paths = controller.paths().clone();

    // A plain file where the snapshot folder should be
    fs::remove_dir_all(paths.ps_snapshots()).unwrap();
    fs::write(paths.ps_snapshots(), b"not a folder").unwrap();

    let outcome = controller
        .run(RunEnvironment {
            navigation: StuckNavigation { online: true },
            skeleton: corridor(3),
            transforms: Arc::new(FixedTransform),
            publisher: Arc::new(RecordingPublisher::default()),
            receivers,
        })
        .unwrap();
    drop(channels);

    assert_eq!(outcome.termination, Termination::WaypointTimeout);
    assert_eq!(
        ledger(&paths).last().map(String::as_str),
        Some("supervisor_finished")
    );
    assert_finalized(&paths, &outcome);
    assert!(paths.ps_snapshots().is_file());
}

// ============================================================================
// Side outputs
// ============================================================================

#[test]
fn test_snapshots_contiguous_and_decodable() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.run.waypoint_timeout_secs = 0.4;

    let (outcome, paths, _) = run_stuck(config, corridor(3), true, true);

    let names = snapshot_files(&paths.ps_snapshots());
    assert!(outcome.snapshots >= 2);
    assert_eq!(names.len() as u64, outcome.snapshots);
    for (i, name) in names.iter().enumerate() {
        assert_eq!(name, &format!("ps_{:08}.bin", i));
    }

    let bytes = fs::read(paths.ps_snapshots().join(&names[0])).unwrap();
    let records = decode_snapshot(&bytes).unwrap();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| !r.contains_key("environ")));
}

#[test]
fn test_previous_ledger_is_backed_up() {
    let dir = TempDir::new().unwrap();
    let paths = RunPaths::new(dir.path());
    paths.create_dirs().unwrap();
    fs::write(paths.run_events(), "timestamp, event\n1, run_start\n").unwrap();

    let mut config = test_config(&dir);
    config.run.waypoint_timeout_secs = 0.2;
    let (_, paths, _) = run_stuck(config, corridor(2), true, true);

    let backups: Vec<String> = snapshot_files(paths.benchmark_data())
        .into_iter()
        .filter(|n| n.starts_with("run_events.csv.bak."))
        .collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(ledger(&paths)[0], "run_start");
}
