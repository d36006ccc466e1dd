//! Mutable state of one run.
//!
//! The interpreter exclusively owns its [`ExecutionContext`]; checkpointing is nothing more
//! than serializing this value (see [`crate::checkpoint`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    blocks::BlockStack,
    condition::{CheckResult, evaluate_condition_with},
    errors::EngineError,
    variables::VariableEnvironment,
};

/// Default cap on loop body entries before a loop is forcibly exited.
pub const DEFAULT_MAX_LOOP_ITERATIONS: u64 = 10_000;

/// One entry of the ordered output log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputRecord {
    pub action_index: usize,
    pub key: String,
    pub value: Value,
}

/// One entry of the ordered error log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedError {
    pub action_index: usize,
    pub error: EngineError,
}

/// Instruction pointer, flags, variables, open blocks, and the run's logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    pub instruction_pointer: usize,
    /// Cleared by handlers that set the pointer themselves; reset after every step.
    pub should_increment: bool,
    pub last_check_result: Option<CheckResult>,
    pub break_flag: bool,
    pub continue_flag: bool,
    pub stop_flag: bool,
    pub continue_on_error: bool,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,
    pub variables: VariableEnvironment,
    pub block_stack: BlockStack,
    pub outputs: Vec<OutputRecord>,
    pub errors: Vec<RecordedError>,
}

fn default_max_loop_iterations() -> u64 {
    DEFAULT_MAX_LOOP_ITERATIONS
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ExecutionContext {
    pub fn new(continue_on_error: bool) -> Self {
        Self {
            instruction_pointer: 0,
            should_increment: true,
            last_check_result: None,
            break_flag: false,
            continue_flag: false,
            stop_flag: false,
            continue_on_error,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            variables: VariableEnvironment::new(),
            block_stack: BlockStack::new(),
            outputs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: VariableEnvironment) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: u64) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    /// Points the interpreter at `index` and suppresses the automatic increment.
    pub fn jump_to(&mut self, index: usize) {
        self.instruction_pointer = index;
        self.should_increment = false;
    }

    /// Evaluates `raw`, substituting variables into each operand.
    ///
    /// Malformed conditions evaluate to `false` and are appended to `errors`.
    pub fn evaluate_condition(&mut self, raw: &str, action_index: usize) -> bool {
        let variables = &self.variables;
        let outcome =
            evaluate_condition_with(raw, self.last_check_result.as_ref(), |text| variables.substitute(text));
        match outcome {
            Ok(result) => result,
            Err(error) => {
                warn!(action_index, condition = %raw, error = %error, "condition evaluated as false");
                self.record_error(action_index, error);
                false
            }
        }
    }

    pub fn record_output(&mut self, action_index: usize, key: impl Into<String>, value: Value) {
        self.outputs.push(OutputRecord {
            action_index,
            key: key.into(),
            value,
        });
    }

    pub fn record_error(&mut self, action_index: usize, error: EngineError) {
        self.errors.push(RecordedError { action_index, error });
    }

    /// Most recently recorded output value under `key`.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .rev()
            .find(|record| record.key == key)
            .map(|record| &record.value)
    }
}
