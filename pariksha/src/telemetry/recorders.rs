//! Per-stream recorder threads.
//!
//! Each inbound stream has its own bounded channel and its own consumer
//! thread, so a slow disk append on one stream never delays another. Every
//! recorder selects between its data channel and the run's shutdown signal.
//! Scan and particle recorders append lines directly; the three pose
//! recorders buffer rows and hand their table back through the join handle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use thiserror::Error;
use tracing::{error, warn};

use super::RunPaths;
use super::messages::{OdometryMsg, ParticleCloudMsg, PoseWithCovarianceMsg, ScanMsg, StampedTransform};
use super::table::PoseTable;
use super::writer::LineWriter;
use crate::supervisor::RunContext;

/// Transform lookup failure. Recoverable: the tick is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("no transform from {source_frame} to {target_frame}")]
    Unavailable {
        target_frame: String,
        source_frame: String,
    },

    #[error("transform lookup failed: {0}")]
    Lookup(String),
}

/// Provides the latest transform between two frames.
pub trait TransformSource: Send + Sync {
    /// Latest transform of `source` expressed in `target`.
    fn lookup_transform(&self, target: &str, source: &str)
    -> Result<StampedTransform, TransformError>;
}

/// Producer side of the telemetry streams.
#[derive(Debug, Clone)]
pub struct TelemetryChannels {
    pub scans: Sender<ScanMsg>,
    pub particles: Sender<ParticleCloudMsg>,
    pub corrections: Sender<PoseWithCovarianceMsg>,
    pub ground_truth: Sender<OdometryMsg>,
}

/// Consumer side of the telemetry streams.
#[derive(Debug)]
pub struct TelemetryReceivers {
    scans: Receiver<ScanMsg>,
    particles: Receiver<ParticleCloudMsg>,
    corrections: Receiver<PoseWithCovarianceMsg>,
    ground_truth: Receiver<OdometryMsg>,
}

/// Create one bounded channel per stream.
pub fn telemetry_channels(capacity: usize) -> (TelemetryChannels, TelemetryReceivers) {
    let (scans_tx, scans_rx) = bounded(capacity);
    let (particles_tx, particles_rx) = bounded(capacity);
    let (corrections_tx, corrections_rx) = bounded(capacity);
    let (ground_truth_tx, ground_truth_rx) = bounded(capacity);

    (
        TelemetryChannels {
            scans: scans_tx,
            particles: particles_tx,
            corrections: corrections_tx,
            ground_truth: ground_truth_tx,
        },
        TelemetryReceivers {
            scans: scans_rx,
            particles: particles_rx,
            corrections: corrections_rx,
            ground_truth: ground_truth_rx,
        },
    )
}

/// Frames used by the estimated-pose recorder.
#[derive(Debug, Clone)]
pub struct EstimatedPoseConfig {
    pub fixed_frame: String,
    pub robot_base_frame: String,
    pub period: Duration,
}

/// Pose tables collected during the run.
#[derive(Debug, Clone, Default)]
pub struct BufferedTables {
    pub estimated_poses: PoseTable,
    pub correction_poses: PoseTable,
    pub ground_truth_poses: PoseTable,
}

impl BufferedTables {
    /// Write the three tables into the run's benchmark data folder.
    pub fn write_all(&self, paths: &RunPaths) -> std::io::Result<()> {
        self.estimated_poses.write_csv(&paths.estimated_poses())?;
        self.correction_poses
            .write_csv(&paths.estimated_correction_poses())?;
        self.ground_truth_poses
            .write_csv(&paths.ground_truth_poses())?;
        Ok(())
    }
}

/// Join handles of the recorder threads.
pub struct RecorderHandles {
    scans: JoinHandle<()>,
    particles: JoinHandle<()>,
    corrections: JoinHandle<PoseTable>,
    ground_truth: JoinHandle<PoseTable>,
    estimated: JoinHandle<PoseTable>,
}

impl RecorderHandles {
    /// Wait for every recorder to exit and collect the buffered tables.
    ///
    /// Call only after the run's shutdown signal fired.
    pub fn join(self) -> BufferedTables {
        for (name, handle) in [("scan", self.scans), ("particle", self.particles)] {
            if handle.join().is_err() {
                error!("The {} recorder panicked", name);
            }
        }

        BufferedTables {
            estimated_poses: join_table(self.estimated, "estimated pose", PoseTable::estimated_poses),
            correction_poses: join_table(
                self.corrections,
                "pose correction",
                PoseTable::correction_poses,
            ),
            ground_truth_poses: join_table(
                self.ground_truth,
                "ground truth",
                PoseTable::ground_truth_poses,
            ),
        }
    }
}

fn join_table(
    handle: JoinHandle<PoseTable>,
    name: &str,
    empty: fn() -> PoseTable,
) -> PoseTable {
    handle.join().unwrap_or_else(|_| {
        error!("The {} recorder panicked, its table is lost", name);
        empty()
    })
}

/// Spawn the five recorders.
pub fn spawn_recorders(
    ctx: Arc<RunContext>,
    paths: &RunPaths,
    receivers: TelemetryReceivers,
    transforms: Arc<dyn TransformSource>,
    estimated: EstimatedPoseConfig,
) -> RecorderHandles {
    let scans = {
        let ctx = Arc::clone(&ctx);
        let writer = LineWriter::new(paths.scans());
        spawn_line_recorder("scan-recorder", ctx, receivers.scans, move |ctx, scan: ScanMsg| {
            ctx.set_first_scan_received();
            if ctx.is_run_started() {
                append(&writer, &scan.to_csv_line());
            }
        })
    };

    let particles = {
        let ctx = Arc::clone(&ctx);
        let writer = LineWriter::new(paths.amcl_particles());
        spawn_line_recorder(
            "particle-recorder",
            ctx,
            receivers.particles,
            move |ctx, cloud: ParticleCloudMsg| {
                if ctx.is_run_started() {
                    append(&writer, &cloud.to_csv_line());
                }
            },
        )
    };

    let corrections = spawn_table_recorder(
        "correction-recorder",
        Arc::clone(&ctx),
        receivers.corrections,
        PoseTable::correction_poses(),
        |ctx, msg: PoseWithCovarianceMsg, table| {
            if ctx.is_run_started() {
                table.push(msg.to_row());
            }
        },
    );

    let ground_truth = spawn_table_recorder(
        "ground-truth-recorder",
        Arc::clone(&ctx),
        receivers.ground_truth,
        PoseTable::ground_truth_poses(),
        |ctx, msg: OdometryMsg, table| {
            ctx.set_ground_truth(msg.pose.to_pose2d());
            if ctx.is_run_started() {
                table.push(msg.to_row());
            }
        },
    );

    let estimated = spawn_estimated_pose_timer(ctx, transforms, estimated);

    RecorderHandles {
        scans,
        particles,
        corrections,
        ground_truth,
        estimated,
    }
}

fn append(writer: &LineWriter, line: &str) {
    if let Err(e) = writer.append_line(line) {
        error!("Failed to append to {:?}: {}", writer.path(), e);
    }
}

fn spawn_line_recorder<T, F>(
    name: &str,
    ctx: Arc<RunContext>,
    rx: Receiver<T>,
    mut handle: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnMut(&RunContext, T) + Send + 'static,
{
    let shutdown = ctx.shutdown_signal();
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            loop {
                select! {
                    recv(rx) -> msg => match msg {
                        Ok(msg) => handle(&ctx, msg),
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                }
            }
        })
        .expect("Failed to spawn recorder thread")
}

fn spawn_table_recorder<T, F>(
    name: &str,
    ctx: Arc<RunContext>,
    rx: Receiver<T>,
    mut table: PoseTable,
    mut handle: F,
) -> JoinHandle<PoseTable>
where
    T: Send + 'static,
    F: FnMut(&RunContext, T, &mut PoseTable) + Send + 'static,
{
    let shutdown = ctx.shutdown_signal();
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            loop {
                select! {
                    recv(rx) -> msg => match msg {
                        Ok(msg) => handle(&ctx, msg, &mut table),
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                }
            }
            table
        })
        .expect("Failed to spawn recorder thread")
}

fn spawn_estimated_pose_timer(
    ctx: Arc<RunContext>,
    transforms: Arc<dyn TransformSource>,
    config: EstimatedPoseConfig,
) -> JoinHandle<PoseTable> {
    let shutdown = ctx.shutdown_signal();
    thread::Builder::new()
        .name("estimated-pose-recorder".into())
        .spawn(move || {
            let mut table = PoseTable::estimated_poses();
            let ticker = tick(config.period);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        if !ctx.is_run_started() {
                            continue;
                        }
                        match transforms.lookup_transform(&config.fixed_frame, &config.robot_base_frame) {
                            Ok(transform) => table.push(transform.to_row()),
                            Err(e) => warn!("Estimated pose lookup failed: {}", e),
                        }
                    }
                    recv(shutdown) -> _ => break,
                }
            }
            table
        })
        .expect("Failed to spawn estimated pose thread")
}
