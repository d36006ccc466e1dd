//! Sequence documents: the YAML/JSON form in which action lists are authored.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_types::Action;

use crate::{context::DEFAULT_MAX_LOOP_ITERATIONS, interpreter::RunOptions, variables::VariableEnvironment};

/// A named action list with its run options and initial variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,
    /// Initial variables in author order.
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_max_loop_iterations() -> u64 {
    DEFAULT_MAX_LOOP_ITERATIONS
}

impl SequenceDocument {
    /// Run options derived from the document. `continue_on_error` is OR-ed with the
    /// caller's override.
    pub fn run_options(&self, force_continue_on_error: bool) -> RunOptions {
        RunOptions {
            continue_on_error: self.continue_on_error || force_continue_on_error,
            max_loop_iterations: self.max_loop_iterations,
            variables: self
                .variables
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect::<VariableEnvironment>(),
        }
    }

    /// Display name, falling back to `"sequence"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or("sequence")
    }
}
