//! Run supervision: shared run context, event ledger and controller.

pub mod context;
pub mod controller;
pub mod events;

pub use context::{RunContext, Termination};
pub use controller::{InterruptHandle, RunController, RunEnvironment, RunOutcome, TourPublisher};
pub use events::{EVENTS_HEADER, RunEvent, RunEventLog};
