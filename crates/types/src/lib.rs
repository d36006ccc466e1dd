//! Shared type definitions for the Stepwise workspace: action records, run states, and
//! the run event stream consumed by hosts.

pub mod action;
pub mod run;

pub use action::{Action, ActionKind, DEFAULT_ACTION_TIMEOUT_MS};
pub use run::{ProgressOutcome, ProgressUpdate, RunEvent, RunState};
