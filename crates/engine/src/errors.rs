//! Error taxonomy for the sequence interpreter and run controller.

use serde::{Deserialize, Serialize};
use stepwise_types::{ActionKind, RunState};
use thiserror::Error;

use crate::blocks::BlockKind;

/// Errors raised while interpreting an action list or driving a run.
///
/// Structural variants (`UnbalancedBlock`, `UnterminatedBlock`) are always fatal.
/// `Executor` and `LoopLimit` are gated by the run's `continue_on_error` policy.
/// `ConditionEvaluation` and `VariableType` are recorded and the run continues.
/// `InvalidTransition` and `Checkpoint` are returned to control-surface callers and are
/// never recorded inside a run.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineError {
    #[error("unbalanced block at action {index}: {message}")]
    UnbalancedBlock { index: usize, message: String },

    #[error("unterminated {kind} block starting at action {start_index}")]
    UnterminatedBlock { kind: BlockKind, start_index: usize },

    #[error("variable '{name}' is not numeric (found {found})")]
    VariableType { name: String, found: String },

    #[error("cannot evaluate condition '{condition}': {reason}")]
    ConditionEvaluation { condition: String, reason: String },

    #[error("action {index} ({kind}) failed: {message}")]
    Executor { index: usize, kind: ActionKind, message: String },

    #[error("loop starting at action {start_index} exceeded {limit} iterations")]
    LoopLimit { start_index: usize, limit: u64 },

    #[error("cannot {operation} while the run is {state}")]
    InvalidTransition { operation: String, state: RunState },

    #[error("checkpoint '{id}': {reason}")]
    Checkpoint { id: String, reason: String },
}

impl EngineError {
    pub fn unbalanced(index: usize, message: impl Into<String>) -> Self {
        Self::UnbalancedBlock {
            index,
            message: message.into(),
        }
    }

    pub fn condition(condition: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConditionEvaluation {
            condition: condition.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(operation: impl Into<String>, state: RunState) -> Self {
        Self::InvalidTransition {
            operation: operation.into(),
            state,
        }
    }

    pub fn checkpoint(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Checkpoint {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for malformed-sequence errors that always fail the run.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::UnbalancedBlock { .. } | Self::UnterminatedBlock { .. })
    }
}
