//! The boundary between the interpreter and whatever performs leaf actions.
//!
//! Executors receive the action plus its variable-substituted target and payload and
//! report a structured [`ActionOutput`]. They never see or mutate the execution context.

pub mod runner;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_types::{Action, ActionKind};
use thiserror::Error;

pub use runner::EchoExecutor;

/// Result of one successful leaf action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Value recorded in the output log (and stored into `store_as` when set).
    pub value: Value,
    /// For check-style actions: whether the check passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

impl ActionOutput {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            passed: None,
        }
    }

    pub fn check(passed: bool, value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            passed: Some(passed),
        }
    }
}

/// Failure reported by an executor for one leaf action.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("action kind {0} is not supported by this executor")]
    Unsupported(ActionKind),
    #[error("{0}")]
    Failed(String),
}

/// Performs the side effect for one leaf action.
///
/// `action.timeout_ms` is passed through untouched; enforcing it is the executor's job.
#[async_trait::async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action, target: Option<&str>, payload: Option<&Value>) -> Result<ActionOutput, ExecutorError>;
}
