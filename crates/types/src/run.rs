//! Run lifecycle states and the event stream emitted while a sequence executes.
//!
//! Hosts own the receiving half of an unbounded channel and render progress from
//! [`RunEvent`]s. Events are notifications only; nothing here is request/response.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Lifecycle state of a single run, owned by the run controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created but not started.
    #[default]
    Idle,
    /// The interpreter may proceed past action boundaries.
    Running,
    /// The interpreter is (or will be, at the next boundary) suspended.
    Paused,
    /// Stopped by a `STOP` action or an external request.
    Stopped,
    /// Ran past the last action.
    Completed,
    /// Aborted by a structural error or an error under a fail-fast policy.
    Failed,
}

impl RunState {
    /// Returns `true` once no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the most recently finished action produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressOutcome {
    /// A leaf action produced an output entry.
    Output { key: String, value: JsonValue },
    /// The action failed; the message mirrors the recorded error.
    Error { message: String },
    /// A flow-control action adjusted the instruction pointer or block stack.
    Control,
}

/// "Step N of M" notification emitted after each completed action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    /// Index of the action that just finished.
    pub index: usize,
    /// Total number of actions in the sequence.
    pub total: usize,
    /// Result of that action.
    pub outcome: ProgressOutcome,
}

/// Lifecycle and progress events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// The interpreter began (or resumed from a checkpoint at `instruction_pointer`).
    RunStarted {
        total_actions: usize,
        instruction_pointer: usize,
        at: DateTime<Utc>,
    },
    /// The run controller changed state.
    StatusChanged { state: RunState, message: Option<String> },
    /// An action finished.
    ActionFinished(ProgressUpdate),
    /// A loop block was exited after `iterations` entries into its body.
    LoopExited { start_index: usize, iterations: u64 },
    /// The interpreter returned.
    RunFinished {
        state: RunState,
        finished_at: DateTime<Utc>,
        error_count: usize,
    },
}
