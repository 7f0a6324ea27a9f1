//! Telemetry recording.
//!
//! Output layout under `<run_output_folder>/benchmark_data/`:
//!
//! | File | Written |
//! |------|---------|
//! | `run_events.csv` | per event |
//! | `scans.csv` | per scan |
//! | `amcl_particles.csv` | per particle set |
//! | `estimated_poses.csv` | at finalization |
//! | `estimated_correction_poses.csv` | at finalization |
//! | `ground_truth_poses.csv` | at finalization |
//! | `ps_snapshots/ps_XXXXXXXX.bin` | per snapshot tick |

pub mod messages;
pub mod recorders;
pub mod snapshot;
pub mod table;
pub mod writer;

use std::io;
use std::path::{Path, PathBuf};

pub use messages::{
    Header, OdometryMsg, ParticleCloudMsg, PoseMsg, PoseWithCovarianceMsg, ScanMsg,
    StampedTransform,
};
pub use recorders::{
    BufferedTables, EstimatedPoseConfig, RecorderHandles, TelemetryChannels, TelemetryReceivers,
    TransformError, TransformSource, spawn_recorders, telemetry_channels,
};
pub use snapshot::{ProcessSnapshotter, SnapshotError, decode_snapshot, spawn_snapshot_timer};
pub use table::PoseTable;
pub use writer::LineWriter;

/// Output file locations of one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    benchmark_data: PathBuf,
}

impl RunPaths {
    pub fn new(run_output_folder: impl AsRef<Path>) -> Self {
        Self {
            benchmark_data: run_output_folder.as_ref().join("benchmark_data"),
        }
    }

    /// Create the benchmark data and snapshot folders.
    pub fn create_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.benchmark_data)?;
        std::fs::create_dir_all(self.ps_snapshots())
    }

    pub fn benchmark_data(&self) -> &Path {
        &self.benchmark_data
    }

    pub fn run_events(&self) -> PathBuf {
        self.benchmark_data.join("run_events.csv")
    }

    pub fn scans(&self) -> PathBuf {
        self.benchmark_data.join("scans.csv")
    }

    pub fn amcl_particles(&self) -> PathBuf {
        self.benchmark_data.join("amcl_particles.csv")
    }

    pub fn estimated_poses(&self) -> PathBuf {
        self.benchmark_data.join("estimated_poses.csv")
    }

    pub fn estimated_correction_poses(&self) -> PathBuf {
        self.benchmark_data.join("estimated_correction_poses.csv")
    }

    pub fn ground_truth_poses(&self) -> PathBuf {
        self.benchmark_data.join("ground_truth_poses.csv")
    }

    pub fn ps_snapshots(&self) -> PathBuf {
        self.benchmark_data.join("ps_snapshots")
    }
}
