//! Goal dispatch to the navigation subsystem.

pub mod client;
pub mod dispatcher;

pub use client::{GoalStatus, NavGoal, NavigationClient, NavigationError};
pub use dispatcher::{
    Classification, DispatchConfig, DispatchOutcome, DispatchState, GoalAttempt, GoalDispatcher,
    RunCounters, classify,
};
