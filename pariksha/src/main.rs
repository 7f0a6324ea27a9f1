//! Pariksha - run a localization benchmark against the simulated robot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use pariksha::core::Pose2D;
use pariksha::planning::{FileSkeletonSource, SkeletonGraph, SkeletonSource};
use pariksha::sim::{LocalizationNoise, SimulatedRobot, demo_skeleton};
use pariksha::telemetry::telemetry_channels;
use pariksha::{ParikshaConfig, Result, RunController, RunEnvironment};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ./pariksha.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run output folder
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skeleton graph JSON file
    #[arg(short, long)]
    graph: Option<PathBuf>,

    /// Seed for tour planning and the simulator
    #[arg(long)]
    seed: Option<u64>,
}

/// File-backed skeleton, or the built-in demo floor plan.
enum Skeleton {
    File(FileSkeletonSource),
    Demo(SkeletonGraph),
}

impl SkeletonSource for Skeleton {
    fn skeleton_graph(
        &self,
        minimum_radius: f32,
    ) -> std::result::Result<SkeletonGraph, pariksha::planning::GraphError> {
        match self {
            Skeleton::File(source) => source.skeleton_graph(minimum_radius),
            Skeleton::Demo(graph) => graph.skeleton_graph(minimum_radius),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pariksha=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            ParikshaConfig::load(path)?
        }
        None if Path::new("pariksha.toml").exists() => {
            info!("Loading configuration from pariksha.toml");
            ParikshaConfig::load(Path::new("pariksha.toml"))?
        }
        None => {
            info!("Using default configuration");
            ParikshaConfig::default()
        }
    };

    if let Some(output) = args.output {
        config.output.run_output_folder = output;
    }
    if let Some(graph) = args.graph {
        config.output.skeleton_path = Some(graph);
    }
    if args.seed.is_some() {
        config.run.seed = args.seed;
    }

    info!("Pariksha v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Streams: scan {}, particles {}, correction {}, ground truth {}, navigation {}",
        config.streams.scan_topic,
        config.streams.amcl_particles_topic,
        config.streams.estimated_pose_correction_topic,
        config.streams.ground_truth_pose_topic,
        config.streams.navigate_to_pose_action
    );
    info!(
        "Robot {} (radius {:.2}m), goal tolerance {:.2}m",
        config.run.robot_entity_name, config.run.robot_radius, config.run.goal_tolerance
    );
    info!("Output folder: {:?}", config.output.run_output_folder);

    let skeleton = match &config.output.skeleton_path {
        Some(path) => Skeleton::File(FileSkeletonSource::new(path)),
        None => Skeleton::Demo(demo_skeleton()),
    };

    let robot = SimulatedRobot::new(
        config.sim.clone(),
        LocalizationNoise {
            std_xy: config.run.initial_pose_std_xy,
            std_theta: config.run.initial_pose_std_theta,
        },
        config.frames.fixed_frame.clone(),
        config.frames.robot_base_frame.clone(),
        Pose2D::new(1.0, 1.0, 0.0),
        config.run.seed.unwrap_or_else(rand::random),
    );

    let (channels, receivers) = telemetry_channels(config.streams.queue_size);
    let controller = RunController::new(config)?;

    // Setup signal handler
    let interrupt = controller.interrupt_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        interrupt.interrupt();
    })?;

    let publisher = robot.spawn_publisher(channels, controller.context().shutdown_signal());

    let outcome = controller.run(RunEnvironment {
        navigation: robot.clone(),
        skeleton,
        transforms: Arc::new(robot.clone()),
        publisher: Arc::new(robot),
        receivers,
    })?;

    if publisher.join().is_err() {
        error!("Simulation thread panicked");
    }

    info!("Run ended: {:?}", outcome.termination);
    info!(
        "Goals: {} planned, {} sent, {} succeeded, {} failed ({} rejected)",
        outcome.num_goals,
        outcome.counters.sent,
        outcome.counters.succeeded,
        outcome.counters.failed,
        outcome.counters.rejected
    );
    info!(
        "Recorded {} estimated, {} correction, {} ground truth poses, {} process snapshots",
        outcome.estimated_poses,
        outcome.correction_poses,
        outcome.ground_truth_poses,
        outcome.snapshots
    );

    Ok(())
}
