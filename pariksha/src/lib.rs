//! Pariksha - Localization benchmark supervisor
//!
//! Drives one benchmark run of a mobile-robot localization stack: plans a
//! tour over the skeleton of the map, sends it to the navigation server goal
//! by goal, and records pose estimates, scans, particle sets and process
//! resource usage while the robot drives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   supervisor/                       │  ← Orchestration
//! │      (run context, event ledger, controller)        │
//! └─────────────────────────────────────────────────────┘
//!                │                        │
//! ┌──────────────────────────┐ ┌────────────────────────┐
//! │       navigation/        │ │       telemetry/       │  ← Run activities
//! │  (client, dispatcher)    │ │ (recorders, snapshots) │
//! └──────────────────────────┘ └────────────────────────┘
//!                │
//! ┌─────────────────────────────────────────────────────┐
//! │                    planning/                        │  ← Tour planning
//! │        (skeleton graph, dijkstra, tour)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      core/                          │  ← Foundation
//! │                  (types, math)                      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! `sim` provides a simulated robot implementing every external interface,
//! used by the `pariksha` binary.
//!
//! # Threads
//!
//! - **Dispatcher** (caller's thread): goal by goal through the tour
//! - **Recorders**: one per telemetry stream, each on its own channel
//! - **Timers**: estimated pose sampling, process snapshots, run watchdog
//!
//! All workers select on the run's shutdown signal, which fires exactly
//! once, when the first terminating condition occurs.

pub mod config;
pub mod core;
pub mod error;
pub mod navigation;
pub mod planning;
pub mod sim;
pub mod supervisor;
pub mod telemetry;

pub use config::ParikshaConfig;
pub use error::{ParikshaError, Result};
pub use supervisor::{RunController, RunEnvironment, RunOutcome, Termination};
