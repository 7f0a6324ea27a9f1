//! Goal dispatcher.
//!
//! Drains the tour one waypoint at a time:
//!
//! ```text
//! Idle -> Dispatching -> AwaitingResult -> Succeeded | Failed -> Dispatching ...
//!                                                  \-> Completed (tour exhausted)
//! any state -> Aborted (fatal error or external termination)
//! ```
//!
//! Goals are never retried and never cancelled. Every wait is sliced so a
//! run terminated from outside (run timeout, interrupt) is noticed within
//! one poll interval; the dispatcher then stops without writing events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::client::{GoalStatus, NavGoal, NavigationClient, NavigationError};
use crate::core::{Pose2D, epoch_secs};
use crate::planning::{Tour, Waypoint};
use crate::supervisor::{RunContext, RunEvent, Termination};

/// Dispatcher timing and tolerance.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Frame of every goal pose.
    pub fixed_frame: String,
    /// Longest wait for the result of a single goal.
    pub waypoint_timeout: Duration,
    /// Longest wait for the navigation server before each goal.
    pub server_wait: Duration,
    /// Pause between a result and the next goal.
    pub settle: Duration,
    /// Largest ground-truth distance that counts as reached (meters).
    pub goal_tolerance: f32,
    /// Wait slice used to notice external termination.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fixed_frame: "map".to_string(),
            waypoint_timeout: Duration::from_secs(180),
            server_wait: Duration::from_secs(5),
            settle: Duration::from_secs(1),
            goal_tolerance: 0.2,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Dispatcher state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    Dispatching,
    AwaitingResult,
    Succeeded,
    Failed,
    Completed,
    Aborted,
}

/// Goal counters. After every classification `sent == succeeded + failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunCounters {
    pub sent: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Goals refused by the server; also counted as failed.
    pub rejected: usize,
}

/// Terminal classification of a goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    /// Navigation succeeded and ground truth is within tolerance.
    Succeeded { distance: f32 },
    /// Navigation claimed success but ground truth is too far away, or
    /// there was no ground truth to check against.
    FailedTooFar { distance: Option<f32> },
    /// Navigation ended with a non-success status.
    FailedNavigation(GoalStatus),
    /// No result within the waypoint timeout.
    TimedOut,
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Succeeded { .. })
    }

    /// Ledger event for this classification.
    pub fn event(&self) -> RunEvent {
        match self {
            Classification::Succeeded { .. } => RunEvent::TargetPoseReached,
            Classification::TimedOut => RunEvent::WaypointTimeout,
            _ => RunEvent::TargetPoseNotReached,
        }
    }
}

/// Classify a terminal goal status against the latest ground truth.
pub fn classify(
    goal: &Pose2D,
    status: GoalStatus,
    ground_truth: Option<Pose2D>,
    tolerance: f32,
) -> Classification {
    if status != GoalStatus::Succeeded {
        return Classification::FailedNavigation(status);
    }

    match ground_truth {
        Some(actual) => {
            let distance = goal.position().distance(&actual.position());
            if distance < tolerance {
                Classification::Succeeded { distance }
            } else {
                Classification::FailedTooFar {
                    distance: Some(distance),
                }
            }
        }
        None => Classification::FailedTooFar { distance: None },
    }
}

/// The goal in flight.
#[derive(Debug, Clone)]
pub struct GoalAttempt {
    pub waypoint: Waypoint,
    pub sent_at: Instant,
    pub classification: Option<Classification>,
}

/// How the dispatch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every waypoint was attempted; `run_completed` was written.
    Completed,
    /// The dispatcher ended the run on a fatal error.
    Aborted(Termination),
    /// The run was terminated from outside.
    Stopped,
}

enum Waited<T> {
    Ready(T),
    TimedOut,
    Stopped,
}

/// Sends the tour to the navigation server, goal by goal.
pub struct GoalDispatcher<C: NavigationClient> {
    config: DispatchConfig,
    ctx: Arc<RunContext>,
    client: C,
    state: DispatchState,
    counters: RunCounters,
    current: Option<GoalAttempt>,
    num_goals: usize,
}

impl<C: NavigationClient> GoalDispatcher<C> {
    pub fn new(config: DispatchConfig, ctx: Arc<RunContext>, client: C) -> Self {
        Self {
            config,
            ctx,
            client,
            state: DispatchState::Idle,
            counters: RunCounters::default(),
            current: None,
            num_goals: 0,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    /// Number of goals in the tour handed to [`run`](Self::run).
    pub fn num_goals(&self) -> usize {
        self.num_goals
    }

    pub fn current_goal(&self) -> Option<&GoalAttempt> {
        self.current.as_ref()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Drive the navigation server through `tour` until it is exhausted or
    /// the run terminates.
    pub fn run(&mut self, mut tour: Tour) -> DispatchOutcome {
        self.num_goals = tour.len();

        loop {
            if self.ctx.is_shutdown() {
                return self.stop();
            }
            self.state = DispatchState::Dispatching;
            info!("goal {} / {}", self.counters.sent + 1, self.num_goals);

            match self.wait_for_server() {
                Waited::Ready(()) => {}
                Waited::Stopped => return self.stop(),
                Waited::TimedOut => {
                    error!("Navigation server not available");
                    return self.abort(
                        Termination::NavigationUnavailable,
                        &[RunEvent::FailedToCommunicateWithNavigationNode],
                    );
                }
            }

            let Some(waypoint) = tour.pop_front() else {
                error!("Insufficient number of poses in traversal path, can not send goal");
                return self.abort(
                    Termination::EmptyTour,
                    &[RunEvent::InsufficientNumberOfPosesInTraversalPath],
                );
            };

            let goal = NavGoal::new(self.config.fixed_frame.clone(), epoch_secs(), waypoint.pose);
            self.counters.sent += 1;

            match self.client.send_goal(&goal) {
                Ok(()) => {
                    if !self.ctx.record(RunEvent::TargetPoseSet) {
                        return self.stop();
                    }
                }
                Err(NavigationError::Rejected(reason)) => {
                    warn!("Goal for vertex {} rejected: {}", waypoint.vertex, reason);
                    self.counters.rejected += 1;
                    self.counters.failed += 1;
                    self.state = DispatchState::Failed;
                    if !self.ctx.record(RunEvent::TargetPoseRejected) {
                        return self.stop();
                    }
                    match self.after_goal(&tour) {
                        Some(outcome) => return outcome,
                        None => continue,
                    }
                }
                Err(e) => {
                    error!("Failed to send goal: {}", e);
                    return self.abort(
                        Termination::NavigationUnavailable,
                        &[RunEvent::FailedToCommunicateWithNavigationNode],
                    );
                }
            }

            self.current = Some(GoalAttempt {
                waypoint,
                sent_at: Instant::now(),
                classification: None,
            });
            self.state = DispatchState::AwaitingResult;

            let status = match self.wait_for_result() {
                Waited::Ready(status) => status,
                Waited::Stopped => return self.stop(),
                Waited::TimedOut => {
                    if let Some(attempt) = self.current.as_mut() {
                        attempt.classification = Some(Classification::TimedOut);
                    }
                    error!("Waypoint timeout for vertex {}", waypoint.vertex);
                    return self.abort(
                        Termination::WaypointTimeout,
                        &[RunEvent::WaypointTimeout, RunEvent::SupervisorFinished],
                    );
                }
            };

            let classification = classify(
                &waypoint.pose,
                status,
                self.ctx.latest_ground_truth(),
                self.config.goal_tolerance,
            );
            match classification {
                Classification::Succeeded { .. } => {
                    self.counters.succeeded += 1;
                    self.state = DispatchState::Succeeded;
                }
                Classification::FailedTooFar { distance } => {
                    error!(
                        "Goal status succeeded but current position farther from goal position than tolerance ({:?})",
                        distance
                    );
                    self.counters.failed += 1;
                    self.state = DispatchState::Failed;
                }
                Classification::FailedNavigation(status) => {
                    info!(
                        "Navigation action failed with status {}, {}",
                        status,
                        self.client.goal_status_text()
                    );
                    if status == GoalStatus::Rejected {
                        self.counters.rejected += 1;
                    }
                    self.counters.failed += 1;
                    self.state = DispatchState::Failed;
                }
                Classification::TimedOut => {}
            }

            if let Some(attempt) = self.current.as_mut() {
                attempt.classification = Some(classification);
            }
            if !self.ctx.record(classification.event()) {
                return self.stop();
            }
            self.current = None;

            if let Some(outcome) = self.after_goal(&tour) {
                return outcome;
            }
        }
    }

    /// Finish the run when the tour is exhausted, otherwise settle.
    fn after_goal(&mut self, tour: &Tour) -> Option<DispatchOutcome> {
        if tour.is_empty() {
            return Some(
                if self
                    .ctx
                    .terminate(Termination::Completed, &[RunEvent::RunCompleted])
                {
                    info!(
                        "Run completed: {} sent, {} succeeded, {} failed",
                        self.counters.sent, self.counters.succeeded, self.counters.failed
                    );
                    self.state = DispatchState::Completed;
                    DispatchOutcome::Completed
                } else {
                    self.stop()
                },
            );
        }

        if self.ctx.wait_for_shutdown(self.config.settle) {
            return Some(self.stop());
        }
        None
    }

    fn wait_for_server(&mut self) -> Waited<()> {
        let deadline = Instant::now() + self.config.server_wait;
        loop {
            let now = Instant::now();
            let slice = deadline
                .saturating_duration_since(now)
                .min(self.config.poll_interval);
            if self.client.wait_for_server(slice) {
                return Waited::Ready(());
            }
            if self.ctx.is_shutdown() {
                return Waited::Stopped;
            }
            if Instant::now() >= deadline {
                return Waited::TimedOut;
            }
        }
    }

    fn wait_for_result(&mut self) -> Waited<GoalStatus> {
        let deadline = Instant::now() + self.config.waypoint_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Waited::TimedOut;
            }
            let slice = (deadline - now).min(self.config.poll_interval);
            if let Some(status) = self.client.wait_for_result(slice) {
                return Waited::Ready(status);
            }
            if self.ctx.is_shutdown() {
                return Waited::Stopped;
            }
        }
    }

    fn abort(&mut self, reason: Termination, events: &[RunEvent]) -> DispatchOutcome {
        self.state = DispatchState::Aborted;
        if self.ctx.terminate(reason, events) {
            DispatchOutcome::Aborted(reason)
        } else {
            DispatchOutcome::Stopped
        }
    }

    fn stop(&mut self) -> DispatchOutcome {
        info!("Run terminated externally, dispatcher stopping");
        self.state = DispatchState::Aborted;
        DispatchOutcome::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::RunEventLog;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        /// Finish with a status, teleporting ground truth to `offset` from the goal.
        Finish(GoalStatus, f32),
        Reject,
        Hang,
    }

    struct ScriptedClient {
        ctx: Arc<RunContext>,
        server_up: bool,
        steps: VecDeque<Step>,
        current: Option<(NavGoal, Step)>,
        goals: Vec<NavGoal>,
    }

    impl ScriptedClient {
        fn new(ctx: Arc<RunContext>, steps: Vec<Step>) -> Self {
            Self {
                ctx,
                server_up: true,
                steps: steps.into(),
                current: None,
                goals: Vec::new(),
            }
        }
    }

    impl NavigationClient for ScriptedClient {
        fn wait_for_server(&mut self, timeout: Duration) -> bool {
            if !self.server_up {
                std::thread::sleep(timeout);
            }
            self.server_up
        }

        fn send_goal(&mut self, goal: &NavGoal) -> Result<(), NavigationError> {
            let step = self.steps.pop_front().unwrap_or(Step::Hang);
            self.goals.push(goal.clone());
            if let Step::Reject = step {
                return Err(NavigationError::Rejected("occupied".into()));
            }
            self.current = Some((goal.clone(), step));
            Ok(())
        }

        fn wait_for_result(&mut self, timeout: Duration) -> Option<GoalStatus> {
            match self.current {
                Some((ref goal, Step::Finish(status, offset))) => {
                    self.ctx
                        .set_ground_truth(Pose2D::new(goal.pose.x + offset, goal.pose.y, 0.0));
                    Some(status)
                }
                _ => {
                    std::thread::sleep(timeout);
                    None
                }
            }
        }

        fn goal_status_text(&self) -> String {
            "scripted".to_string()
        }
    }

    fn setup(dir: &TempDir) -> Arc<RunContext> {
        let log = RunEventLog::create(dir.path().join("run_events.csv")).unwrap();
        Arc::new(RunContext::new(log))
    }

    fn tour(n: u32) -> Tour {
        Tour::new(
            (0..n)
                .map(|i| Waypoint {
                    vertex: i,
                    pose: Pose2D::new(i as f32, 0.0, 0.0),
                })
                .collect(),
            n as f32,
        )
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            waypoint_timeout: Duration::from_millis(200),
            server_wait: Duration::from_millis(100),
            settle: Duration::ZERO,
            goal_tolerance: 0.2,
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify() {
        let goal = Pose2D::new(1.0, 1.0, 0.0);

        assert!(
            classify(&goal, GoalStatus::Succeeded, Some(Pose2D::new(1.1, 1.0, 2.0)), 0.2)
                .is_success()
        );
        assert_eq!(
            classify(&goal, GoalStatus::Succeeded, None, 0.2),
            Classification::FailedTooFar { distance: None }
        );
        assert!(matches!(
            classify(&goal, GoalStatus::Succeeded, Some(Pose2D::new(2.0, 1.0, 0.0)), 0.2),
            Classification::FailedTooFar { distance: Some(d) } if (d - 1.0).abs() < 1e-6
        ));
        // Exactly at tolerance is not reached
        assert!(
            !classify(&goal, GoalStatus::Succeeded, Some(Pose2D::new(1.5, 1.0, 0.0)), 0.5)
                .is_success()
        );
        assert_eq!(
            classify(&goal, GoalStatus::Aborted, Some(goal), 0.2),
            Classification::FailedNavigation(GoalStatus::Aborted)
        );
    }

    #[test]
    fn test_all_goals_reached() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir);
        let client = ScriptedClient::new(
            Arc::clone(&ctx),
            vec![Step::Finish(GoalStatus::Succeeded, 0.0); 3],
        );
        let mut dispatcher = GoalDispatcher::new(fast_config(), Arc::clone(&ctx), client);

        assert_eq!(dispatcher.run(tour(3)), DispatchOutcome::Completed);
        assert_eq!(dispatcher.state(), DispatchState::Completed);
        assert_eq!(
            dispatcher.counters(),
            RunCounters {
                sent: 3,
                succeeded: 3,
                failed: 0,
                rejected: 0
            }
        );
        assert!(dispatcher.current_goal().is_none());
        assert_eq!(dispatcher.client().goals.len(), 3);
        assert_eq!(dispatcher.client().goals[1].frame_id, "map");

        use RunEvent::*;
        assert_eq!(
            ctx.events().events(),
            vec![
                TargetPoseSet,
                TargetPoseReached,
                TargetPoseSet,
                TargetPoseReached,
                TargetPoseSet,
                TargetPoseReached,
                RunCompleted
            ]
        );
        assert_eq!(ctx.termination(), Some(Termination::Completed));
    }

    #[test]
    fn test_mixed_results_keep_counter_invariant() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir);
        let client = ScriptedClient::new(
            Arc::clone(&ctx),
            vec![
                Step::Finish(GoalStatus::Succeeded, 0.05),
                Step::Finish(GoalStatus::Succeeded, 1.0),
                Step::Finish(GoalStatus::Aborted, 0.0),
                Step::Reject,
                Step::Finish(GoalStatus::Rejected, 0.0),
            ],
        );
        let mut dispatcher = GoalDispatcher::new(fast_config(), Arc::clone(&ctx), client);

        assert_eq!(dispatcher.run(tour(5)), DispatchOutcome::Completed);
        let c = dispatcher.counters();
        assert_eq!(c.sent, 5);
        assert_eq!(c.succeeded, 1);
        assert_eq!(c.failed, 4);
        assert_eq!(c.rejected, 2);
        assert_eq!(c.sent, c.succeeded + c.failed);

        let events = ctx.events().events();
        assert_eq!(events.iter().filter(|e| **e == RunEvent::TargetPoseSet).count(), 4);
        assert_eq!(
            events.iter().filter(|e| **e == RunEvent::TargetPoseNotReached).count(),
            3
        );
        assert!(events.contains(&RunEvent::TargetPoseRejected));
        assert_eq!(events.last(), Some(&RunEvent::RunCompleted));
    }

    #[test]
    fn test_waypoint_timeout_is_fatal() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir);
        let client = ScriptedClient::new(
            Arc::clone(&ctx),
            vec![Step::Finish(GoalStatus::Succeeded, 0.0), Step::Hang],
        );
        let mut dispatcher = GoalDispatcher::new(fast_config(), Arc::clone(&ctx), client);

        assert_eq!(
            dispatcher.run(tour(3)),
            DispatchOutcome::Aborted(Termination::WaypointTimeout)
        );
        assert_eq!(dispatcher.counters().sent, 2);
        assert_eq!(
            dispatcher.current_goal().and_then(|a| a.classification),
            Some(Classification::TimedOut)
        );

        use RunEvent::*;
        assert_eq!(
            ctx.events().events(),
            vec![
                TargetPoseSet,
                TargetPoseReached,
                TargetPoseSet,
                WaypointTimeout,
                SupervisorFinished
            ]
        );
    }

    #[test]
    fn test_server_unavailable() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir);
        let mut client = ScriptedClient::new(Arc::clone(&ctx), vec![]);
        client.server_up = false;
        let mut dispatcher = GoalDispatcher::new(fast_config(), Arc::clone(&ctx), client);

        assert_eq!(
            dispatcher.run(tour(2)),
            DispatchOutcome::Aborted(Termination::NavigationUnavailable)
        );
        assert_eq!(dispatcher.counters().sent, 0);
        assert_eq!(
            ctx.events().events(),
            vec![RunEvent::FailedToCommunicateWithNavigationNode]
        );
    }

    #[test]
    fn test_empty_tour() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir);
        let client = ScriptedClient::new(Arc::clone(&ctx), vec![]);
        let mut dispatcher = GoalDispatcher::new(fast_config(), Arc::clone(&ctx), client);

        assert_eq!(
            dispatcher.run(Tour::default()),
            DispatchOutcome::Aborted(Termination::EmptyTour)
        );
        assert_eq!(
            ctx.events().events(),
            vec![RunEvent::InsufficientNumberOfPosesInTraversalPath]
        );
    }

    #[test]
    fn test_external_termination_stops_without_events() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir);
        let client = ScriptedClient::new(Arc::clone(&ctx), vec![Step::Hang]);
        let mut config = fast_config();
        config.waypoint_timeout = Duration::from_secs(30);

        let terminator = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                ctx.terminate(
                    Termination::RunTimeout,
                    &[RunEvent::RunTimeout, RunEvent::SupervisorFinished],
                );
            })
        };

        let start = Instant::now();
        let mut dispatcher = GoalDispatcher::new(config, Arc::clone(&ctx), client);
        assert_eq!(dispatcher.run(tour(3)), DispatchOutcome::Stopped);
        assert!(start.elapsed() < Duration::from_secs(5));
        terminator.join().unwrap();

        assert_eq!(dispatcher.state(), DispatchState::Aborted);
        assert_eq!(
            ctx.events().events(),
            vec![
                RunEvent::TargetPoseSet,
                RunEvent::RunTimeout,
                RunEvent::SupervisorFinished
            ]
        );
    }
}
