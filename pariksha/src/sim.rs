//! Simulated robot for running a benchmark without a robot stack.
//!
//! A point robot drives straight toward the current goal at constant
//! speed. A publisher thread advances it and emits every telemetry stream:
//! scans, a particle set spread around a noisy estimate, pose corrections
//! with covariance, and ground-truth odometry. The same handle serves as
//! navigation server, transform source and tour publisher.

use std::f32::consts::PI;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, tick};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::core::{Point2D, Pose2D, epoch_secs, normalize_angle, quaternion_from_yaw};
use crate::navigation::{GoalStatus, NavGoal, NavigationClient, NavigationError};
use crate::planning::{Edge, SkeletonGraph, Tour, Vertex};
use crate::supervisor::TourPublisher;
use crate::telemetry::{
    Header, OdometryMsg, ParticleCloudMsg, PoseMsg, PoseWithCovarianceMsg, ScanMsg,
    StampedTransform, TelemetryChannels, TransformError, TransformSource,
};

/// Distance at which the simulated robot considers a goal reached.
const ARRIVAL_DISTANCE: f32 = 0.02;

/// Wall distance reported by the synthetic scan.
const SCAN_RANGE: f32 = 4.0;

/// Initial pose noise of the simulated localizer.
#[derive(Debug, Clone, Copy)]
pub struct LocalizationNoise {
    pub std_xy: f32,
    pub std_theta: f32,
}

#[derive(Debug)]
struct ActiveGoal {
    id: u64,
    target: Point2D,
    heading: f32,
    /// Remaining distance at which the goal is aborted.
    abort_at: Option<f32>,
}

#[derive(Debug)]
struct SimState {
    pose: Pose2D,
    estimate: Pose2D,
    velocity: (f32, f32, f32),
    goal: Option<ActiveGoal>,
    next_goal_id: u64,
    status_text: String,
    published_tour: Option<Vec<Pose2D>>,
    rng: StdRng,
}

struct Shared {
    config: SimConfig,
    noise: LocalizationNoise,
    frame_id: String,
    base_frame: String,
    state: Mutex<SimState>,
    results_tx: Sender<(u64, GoalStatus)>,
    results_rx: Receiver<(u64, GoalStatus)>,
    available: std::sync::atomic::AtomicBool,
}

/// Handle to the simulated robot. Clones share the same robot.
#[derive(Clone)]
pub struct SimulatedRobot {
    shared: Arc<Shared>,
    current_goal: Option<u64>,
}

impl SimulatedRobot {
    pub fn new(
        config: SimConfig,
        noise: LocalizationNoise,
        frame_id: impl Into<String>,
        base_frame: impl Into<String>,
        start: Pose2D,
        seed: u64,
    ) -> Self {
        let (results_tx, results_rx) = bounded(16);
        Self {
            shared: Arc::new(Shared {
                config,
                noise,
                frame_id: frame_id.into(),
                base_frame: base_frame.into(),
                state: Mutex::new(SimState {
                    pose: start,
                    estimate: start,
                    velocity: (0.0, 0.0, 0.0),
                    goal: None,
                    next_goal_id: 0,
                    status_text: String::new(),
                    published_tour: None,
                    rng: StdRng::seed_from_u64(seed),
                }),
                results_tx,
                results_rx,
                available: std::sync::atomic::AtomicBool::new(true),
            }),
            current_goal: None,
        }
    }

    /// Take the navigation server offline (or back online).
    pub fn set_available(&self, available: bool) {
        self.shared
            .available
            .store(available, std::sync::atomic::Ordering::Release);
    }

    /// Ground-truth pose.
    pub fn pose(&self) -> Pose2D {
        self.shared.state.lock().pose
    }

    /// Poses of the last published tour.
    pub fn published_tour(&self) -> Option<Vec<Pose2D>> {
        self.shared.state.lock().published_tour.clone()
    }

    /// Advance the robot by `dt` seconds.
    pub fn step(&self, dt: f32) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let travel = shared.config.speed * dt;

        let mut finished = None;
        match state.goal.as_ref().map(|g| (g.id, g.target, g.heading, g.abort_at)) {
            Some((id, target, heading, abort_at)) => {
                let position = state.pose.position();
                let distance = position.distance(&target);

                if abort_at.is_some_and(|at| distance <= at) {
                    // Gives up halfway and stays put
                    state.velocity = (0.0, 0.0, 0.0);
                    finished = Some((id, GoalStatus::Aborted));
                } else if distance <= travel.max(ARRIVAL_DISTANCE) {
                    let dtheta = normalize_angle(heading - state.pose.theta);
                    state.velocity = rates(target.x - position.x, target.y - position.y, dtheta, dt);
                    state.pose = Pose2D::new(target.x, target.y, heading);
                    finished = Some((id, GoalStatus::Succeeded));
                } else {
                    let dx = (target.x - position.x) / distance * travel;
                    let dy = (target.y - position.y) / distance * travel;
                    let course = dy.atan2(dx);
                    let dtheta = normalize_angle(course - state.pose.theta);
                    state.velocity = rates(dx, dy, dtheta, dt);
                    state.pose = Pose2D::new(position.x + dx, position.y + dy, course);
                }
            }
            None => state.velocity = (0.0, 0.0, 0.0),
        }

        // Localizer estimate: ground truth plus bounded noise
        let noise = shared.noise;
        let pose = state.pose;
        let ex = state.rng.random_range(-0.5f32..=0.5) * noise.std_xy;
        let ey = state.rng.random_range(-0.5f32..=0.5) * noise.std_xy;
        let et = state.rng.random_range(-0.5f32..=0.5) * noise.std_theta;
        state.estimate = Pose2D::new(pose.x + ex, pose.y + ey, pose.theta + et);

        if let Some((id, status)) = finished {
            state.goal = None;
            state.status_text = match status {
                GoalStatus::Succeeded => "Goal reached.".to_string(),
                _ => "Failed to find a valid plan.".to_string(),
            };
            drop(state);
            debug!("Simulated goal {} finished: {}", id, status);
            let _ = shared.results_tx.try_send((id, status));
        }
    }

    fn header(&self, stamp: f64) -> Header {
        Header::new(stamp, self.shared.frame_id.clone())
    }

    fn scan(&self, stamp: f64) -> ScanMsg {
        let beams = self.shared.config.scan_beams.max(2);
        let increment = 2.0 * PI / beams as f32;
        let mut state = self.shared.state.lock();
        let ranges = (0..beams)
            .map(|_| SCAN_RANGE + state.rng.random_range(-0.02f32..0.02))
            .collect();
        ScanMsg {
            header: Header::new(stamp, self.shared.base_frame.clone()),
            angle_min: -PI,
            angle_max: -PI + increment * (beams - 1) as f32,
            angle_increment: increment,
            range_min: 0.1,
            range_max: SCAN_RANGE * 2.0,
            ranges,
        }
    }

    fn particles(&self, stamp: f64) -> ParticleCloudMsg {
        let noise = self.shared.noise;
        let mut state = self.shared.state.lock();
        let estimate = state.estimate;
        let poses = (0..self.shared.config.particles)
            .map(|_| {
                let x = estimate.x + state.rng.random_range(-1.0f32..=1.0) * noise.std_xy;
                let y = estimate.y + state.rng.random_range(-1.0f32..=1.0) * noise.std_xy;
                let theta = estimate.theta + state.rng.random_range(-1.0f32..=1.0) * noise.std_theta;
                PoseMsg::from(Pose2D::new(x, y, theta))
            })
            .collect();
        ParticleCloudMsg {
            header: self.header(stamp),
            poses,
        }
    }

    fn correction(&self, stamp: f64) -> PoseWithCovarianceMsg {
        let noise = self.shared.noise;
        let estimate = self.shared.state.lock().estimate;
        let mut covariance = [0.0; 36];
        covariance[0] = (noise.std_xy as f64).powi(2);
        covariance[7] = (noise.std_xy as f64).powi(2);
        covariance[35] = (noise.std_theta as f64).powi(2);
        PoseWithCovarianceMsg {
            header: self.header(stamp),
            pose: PoseMsg::from(estimate),
            covariance,
        }
    }

    fn odometry(&self, stamp: f64) -> OdometryMsg {
        let state = self.shared.state.lock();
        OdometryMsg {
            header: self.header(stamp),
            pose: PoseMsg::from(state.pose),
            linear_x: state.velocity.0,
            linear_y: state.velocity.1,
            angular_z: state.velocity.2,
        }
    }

    /// Step the robot and publish every stream at the configured rate until
    /// `shutdown` disconnects.
    pub fn spawn_publisher(
        &self,
        channels: TelemetryChannels,
        shutdown: Receiver<()>,
    ) -> JoinHandle<()> {
        let robot = self.clone();
        let rate = self.shared.config.publish_rate_hz.max(1.0);
        let period = Duration::from_secs_f32(1.0 / rate);

        thread::Builder::new()
            .name("sim-publisher".into())
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            robot.step(period.as_secs_f32());
                            let stamp = epoch_secs();
                            offer(&channels.scans, robot.scan(stamp));
                            offer(&channels.particles, robot.particles(stamp));
                            offer(&channels.corrections, robot.correction(stamp));
                            offer(&channels.ground_truth, robot.odometry(stamp));
                        }
                        recv(shutdown) -> _ => break,
                    }
                }
                debug!("Simulated publisher stopped");
            })
            .expect("Failed to spawn simulation thread")
    }
}

fn rates(dx: f32, dy: f32, dtheta: f32, dt: f32) -> (f32, f32, f32) {
    if dt > 0.0 {
        (dx / dt, dy / dt, dtheta / dt)
    } else {
        (0.0, 0.0, 0.0)
    }
}

/// Send without blocking; a full queue drops the message.
fn offer<T>(tx: &Sender<T>, msg: T) {
    if let Err(TrySendError::Disconnected(_)) = tx.try_send(msg) {
        debug!("Telemetry channel closed");
    }
}

impl NavigationClient for SimulatedRobot {
    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        let available = self
            .shared
            .available
            .load(std::sync::atomic::Ordering::Acquire);
        if !available {
            thread::sleep(timeout);
        }
        available
    }

    fn send_goal(&mut self, goal: &NavGoal) -> std::result::Result<(), NavigationError> {
        if goal.frame_id != self.shared.frame_id {
            return Err(NavigationError::Rejected(format!(
                "goal frame {} is not {}",
                goal.frame_id, self.shared.frame_id
            )));
        }

        let mut state = self.shared.state.lock();
        let id = state.next_goal_id;
        state.next_goal_id += 1;
        let target = goal.pose.position();
        let abort = state.rng.random::<f32>() < self.shared.config.abort_probability;
        let abort_at = abort.then(|| 0.5 * state.pose.position().distance(&target));
        state.goal = Some(ActiveGoal {
            id,
            target,
            heading: goal.pose.theta,
            abort_at,
        });
        self.current_goal = Some(id);
        Ok(())
    }

    fn wait_for_result(&mut self, timeout: Duration) -> Option<GoalStatus> {
        let current = self.current_goal?;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.shared.results_rx.recv_timeout(remaining) {
                Ok((id, status)) if id == current => {
                    self.current_goal = None;
                    return Some(status);
                }
                // Result of a superseded goal
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    fn goal_status_text(&self) -> String {
        self.shared.state.lock().status_text.clone()
    }
}

impl TransformSource for SimulatedRobot {
    fn lookup_transform(
        &self,
        target: &str,
        source: &str,
    ) -> std::result::Result<StampedTransform, TransformError> {
        if target != self.shared.frame_id || source != self.shared.base_frame {
            return Err(TransformError::Unavailable {
                target_frame: target.to_string(),
                source_frame: source.to_string(),
            });
        }
        let estimate = self.shared.state.lock().estimate;
        Ok(StampedTransform {
            header: self.header(epoch_secs()),
            child_frame_id: source.to_string(),
            translation: estimate.position(),
            rotation: quaternion_from_yaw(estimate.theta),
        })
    }
}

impl TourPublisher for SimulatedRobot {
    fn publish_tour(&self, frame_id: &str, tour: &Tour) {
        info!(
            "Publishing traversal path of {} poses in {} ({:.1}m along the skeleton)",
            tour.len(),
            frame_id,
            tour.cost()
        );
        self.shared.state.lock().published_tour = Some(tour.waypoints().map(|w| w.pose).collect());
    }
}

/// Skeleton of a small two-room floor plan joined by a corridor.
///
/// Vertices near walls carry a small clearance radius and are dropped for
/// larger robots; a few isolated vertices exercise component pruning.
pub fn demo_skeleton() -> SkeletonGraph {
    fn link(edges: &mut Vec<Edge>, a: u32, b: u32, pa: (f32, f32), pb: (f32, f32)) {
        let weight = ((pa.0 - pb.0).powi(2) + (pa.1 - pb.1).powi(2)).sqrt();
        edges.push(Edge::new(a, b, weight));
    }

    let mut vertices = Vec::new();
    let mut edges = Vec::new();

    // Two 3x3 rooms, 1 m spacing, the second shifted by 6 m
    let mut positions = std::collections::HashMap::new();
    for room in 0..2u32 {
        for row in 0..3u32 {
            for col in 0..3u32 {
                let id = room * 100 + row * 3 + col;
                let pos = (room as f32 * 6.0 + col as f32, row as f32);
                let edge_of_room = row != 1 || col != 1;
                let radius = if edge_of_room { 0.6 } else { 1.0 };
                vertices.push(Vertex::new(id, pos.0, pos.1).with_radius(radius));
                positions.insert(id, pos);
            }
        }
    }
    for room in 0..2u32 {
        for row in 0..3u32 {
            for col in 0..3u32 {
                let id = room * 100 + row * 3 + col;
                if col < 2 {
                    link(&mut edges, id, id + 1, positions[&id], positions[&(id + 1)]);
                }
                if row < 2 {
                    link(&mut edges, id, id + 3, positions[&id], positions[&(id + 3)]);
                }
            }
        }
    }

    // Corridor from the middle of room 0's east wall to room 1's west wall
    let corridor = [(200u32, 3.0f32, 1.0f32), (201, 4.0, 1.0), (202, 5.0, 1.0)];
    let mut previous = (5u32, positions[&5]);
    for &(id, x, y) in &corridor {
        vertices.push(Vertex::new(id, x, y).with_radius(0.45));
        link(&mut edges, previous.0, id, previous.1, (x, y));
        previous = (id, (x, y));
    }
    link(&mut edges, previous.0, 103, previous.1, positions[&103]);

    // Narrow alcove, too tight for most robots
    vertices.push(Vertex::new(300, 1.0, 3.0).with_radius(0.15));
    link(&mut edges, 7, 300, positions[&7], (1.0, 3.0));

    // Isolated vertices
    vertices.push(Vertex::new(400, 10.0, 10.0).with_radius(1.0));
    vertices.push(Vertex::new(401, -4.0, 5.0).with_radius(1.0));

    // Built from consistent ids and positive weights
    SkeletonGraph::new(vertices, edges).unwrap_or_default()
}
