//! Error types for Pariksha

use thiserror::Error;

use crate::navigation::NavigationError;
use crate::planning::{GraphError, PlanError};
use crate::telemetry::snapshot::SnapshotError;

/// Pariksha error type
#[derive(Error, Debug)]
pub enum ParikshaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Skeleton graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Process snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl From<toml::de::Error> for ParikshaError {
    fn from(e: toml::de::Error) -> Self {
        ParikshaError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ParikshaError>;
