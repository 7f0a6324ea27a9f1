//! Run controller: startup, termination arbitration and finalization.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{after, select};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info, warn};

use super::context::{RunContext, Termination};
use super::events::{RunEvent, RunEventLog};
use crate::config::ParikshaConfig;
use crate::error::Result;
use crate::navigation::{GoalDispatcher, NavigationClient, RunCounters};
use crate::planning::{SkeletonPathPlanner, SkeletonSource, Tour};
use crate::telemetry::{
    BufferedTables, ProcessSnapshotter, RunPaths, TelemetryReceivers, TransformSource,
    spawn_recorders, spawn_snapshot_timer,
};

/// How often the first-scan wait polls.
const FIRST_SCAN_POLL: Duration = Duration::from_millis(500);

/// How often the first-scan wait repeats its warning.
const FIRST_SCAN_WARN_EVERY: u32 = 10;

/// Publishes the planned tour once, for visualization.
pub trait TourPublisher: Send + Sync {
    fn publish_tour(&self, frame_id: &str, tour: &Tour);
}

/// External collaborators of a run.
pub struct RunEnvironment<C: NavigationClient, S: SkeletonSource> {
    pub navigation: C,
    pub skeleton: S,
    pub transforms: Arc<dyn TransformSource>,
    pub publisher: Arc<dyn TourPublisher>,
    pub receivers: TelemetryReceivers,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub termination: Termination,
    pub counters: RunCounters,
    /// Goals in the planned tour (0 when planning never happened).
    pub num_goals: usize,
    /// Process snapshots attempted.
    pub snapshots: u64,
    pub estimated_poses: usize,
    pub correction_poses: usize,
    pub ground_truth_poses: usize,
    /// Times the pose tables were written; exactly one for a finished run.
    pub finalizations: u32,
}

/// Clonable handle that ends the run as an external interrupt.
#[derive(Clone)]
pub struct InterruptHandle {
    ctx: Arc<RunContext>,
}

impl InterruptHandle {
    /// Returns `false` when the run had already terminated.
    pub fn interrupt(&self) -> bool {
        warn!("Asked to shutdown, terminating run");
        self.ctx.terminate(
            Termination::Interrupted,
            &[RunEvent::RosShutdown, RunEvent::SupervisorFinished],
        )
    }
}

/// Supervises one benchmark run.
pub struct RunController {
    config: ParikshaConfig,
    paths: RunPaths,
    ctx: Arc<RunContext>,
}

impl RunController {
    /// Prepare the output folders and open a fresh event ledger.
    pub fn new(config: ParikshaConfig) -> Result<Self> {
        let paths = RunPaths::new(&config.output.run_output_folder);
        paths.create_dirs()?;
        let events = RunEventLog::create(paths.run_events())?;

        Ok(Self {
            config,
            paths,
            ctx: Arc::new(RunContext::new(events)),
        })
    }

    pub fn context(&self) -> Arc<RunContext> {
        Arc::clone(&self.ctx)
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Execute the run to termination and write the buffered tables.
    pub fn run<C, S>(self, env: RunEnvironment<C, S>) -> Result<RunOutcome>
    where
        C: NavigationClient,
        S: SkeletonSource,
    {
        let RunEnvironment {
            navigation,
            skeleton,
            transforms,
            publisher,
            receivers,
        } = env;

        // Workers start before planning so nothing published during the
        // first-scan wait is lost
        let snapshotter = match ProcessSnapshotter::new(
            self.config.run.tracked_root_pid,
            self.paths.ps_snapshots(),
        ) {
            Ok(snapshotter) => snapshotter,
            Err(e) => {
                error!("Process snapshots unavailable, tracking nothing: {}", e);
                ProcessSnapshotter::untracked(self.paths.ps_snapshots())
            }
        };
        let recorders = spawn_recorders(
            Arc::clone(&self.ctx),
            &self.paths,
            receivers,
            transforms,
            self.config.estimated_pose(),
        );
        let snapshots = spawn_snapshot_timer(
            snapshotter,
            self.config.ps_snapshot_period(),
            self.ctx.shutdown_signal(),
        );
        let watchdog = spawn_watchdog(Arc::clone(&self.ctx), self.config.run_timeout());

        let mut counters = RunCounters::default();
        let mut num_goals = 0;

        if self.wait_for_first_scan()
            && let Some(tour) = self.plan(&skeleton)
        {
            num_goals = tour.len();
            publisher.publish_tour(&self.config.frames.fixed_frame, &tour);

            if self.ctx.record(RunEvent::RunStart) {
                self.ctx.set_run_started();
                let mut dispatcher =
                    GoalDispatcher::new(self.config.dispatch(), Arc::clone(&self.ctx), navigation);
                let outcome = dispatcher.run(tour);
                counters = dispatcher.counters();
                info!("Dispatcher finished: {:?}", outcome);
            }
        }

        let termination = self.ctx.termination().unwrap_or(Termination::Interrupted);

        // Every worker exits on the shutdown signal; join before touching tables
        if watchdog.join().is_err() {
            error!("Run watchdog panicked");
        }
        let snapshots = snapshots
            .join()
            .map(|s| s.sequence())
            .unwrap_or_else(|_| {
                error!("Snapshot timer panicked");
                0
            });
        let tables = recorders.join();

        self.finalize(&tables);

        Ok(RunOutcome {
            termination,
            counters,
            num_goals,
            snapshots,
            estimated_poses: tables.estimated_poses.len(),
            correction_poses: tables.correction_poses.len(),
            ground_truth_poses: tables.ground_truth_poses.len(),
            finalizations: self.ctx.finalizations(),
        })
    }

    /// Block until the first scan arrives. Returns `false` on shutdown.
    fn wait_for_first_scan(&self) -> bool {
        info!("Preparing to start run, waiting for the first scan");
        let mut polls = 0u32;
        while !self.ctx.is_first_scan_received() {
            if self.ctx.wait_for_shutdown(FIRST_SCAN_POLL) {
                return false;
            }
            polls += 1;
            if polls % FIRST_SCAN_WARN_EVERY == 0 {
                warn!(
                    "Waiting to receive first scan ({:.1}s)",
                    polls as f32 * FIRST_SCAN_POLL.as_secs_f32()
                );
            }
        }
        !self.ctx.is_shutdown()
    }

    /// Plan the tour; on failure the run is terminated.
    fn plan<S: SkeletonSource>(&self, skeleton: &S) -> Option<Tour> {
        let graph = match skeleton.skeleton_graph(self.config.minimum_clearance()) {
            Ok(graph) => graph,
            Err(e) => {
                error!("Could not obtain the skeleton graph: {}", e);
                self.ctx.terminate(
                    Termination::PlanningFailed,
                    &[RunEvent::InsufficientNumberOfNodesInDeleavedReducedVoronoiGraph],
                );
                return None;
            }
        };

        let mut rng = match self.config.run.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        match SkeletonPathPlanner::new().plan(&graph, &mut rng) {
            Ok(tour) => Some(tour),
            Err(e) => {
                error!("{}", e);
                self.ctx.terminate(
                    Termination::PlanningFailed,
                    &[RunEvent::InsufficientNumberOfNodesInDeleavedReducedVoronoiGraph],
                );
                None
            }
        }
    }

    fn finalize(&self, tables: &BufferedTables) {
        self.ctx.mark_finalized();
        match tables.write_all(&self.paths) {
            Ok(()) => info!(
                "Wrote {} estimated, {} correction and {} ground truth poses",
                tables.estimated_poses.len(),
                tables.correction_poses.len(),
                tables.ground_truth_poses.len()
            ),
            Err(e) => error!("Failed to write pose tables: {}", e),
        }
    }
}

/// Terminate the run once `timeout` elapses, unless it ends first.
fn spawn_watchdog(ctx: Arc<RunContext>, timeout: Duration) -> JoinHandle<()> {
    let shutdown = ctx.shutdown_signal();
    thread::Builder::new()
        .name("run-watchdog".into())
        .spawn(move || {
            select! {
                recv(after(timeout)) -> _ => {
                    error!("Terminating supervisor due to timeout, terminating run");
                    ctx.terminate(
                        Termination::RunTimeout,
                        &[RunEvent::RunTimeout, RunEvent::SupervisorFinished],
                    );
                }
                recv(shutdown) -> _ => {}
            }
        })
        .expect("Failed to spawn watchdog thread")
}
