//! The sequence interpreter: a flat dispatch loop over an action list.
//!
//! Each iteration asks the [`RunController`] whether it may proceed, fetches the action
//! under the instruction pointer, and dispatches on its kind. Flow-control handlers move
//! the pointer themselves (and clear `should_increment`); everything else advances by one.
//! There is no recursion: nested blocks live entirely on the context's block stack.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_types::{Action, ActionKind, ProgressOutcome, ProgressUpdate, RunEvent, RunState};
use tracing::{debug, info, warn};

use crate::{
    blocks::{BlockKind, find_block_end, find_next_branch},
    condition::CheckResult,
    context::{DEFAULT_MAX_LOOP_ITERATIONS, ExecutionContext, OutputRecord, RecordedError},
    controller::{Boundary, RunController},
    errors::EngineError,
    executor::ActionExecutor,
    variables::{VariableEnvironment, format_value},
};

/// Settings fixed at run start.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub continue_on_error: bool,
    pub max_loop_iterations: u64,
    pub variables: VariableEnvironment,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            variables: VariableEnvironment::new(),
        }
    }
}

/// Final account of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    pub instruction_pointer: usize,
    pub outputs: Vec<OutputRecord>,
    pub errors: Vec<RecordedError>,
    pub variables: VariableEnvironment,
    pub terminal_error: Option<EngineError>,
}

impl RunReport {
    /// Most recently recorded output value under `key`.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .rev()
            .find(|record| record.key == key)
            .map(|record| &record.value)
    }
}

enum Flow {
    Next(ProgressOutcome),
    Stop,
}

/// Executes one action list against one executor under one controller.
pub struct SequenceInterpreter {
    actions: Arc<[Action]>,
    context: ExecutionContext,
    executor: Arc<dyn ActionExecutor>,
    controller: RunController,
}

impl SequenceInterpreter {
    pub fn new(actions: Vec<Action>, options: RunOptions, executor: Arc<dyn ActionExecutor>, controller: RunController) -> Self {
        let context = ExecutionContext::new(options.continue_on_error)
            .with_variables(options.variables)
            .with_max_loop_iterations(options.max_loop_iterations);
        Self::from_context(actions, context, executor, controller)
    }

    /// Resumes from a restored context, typically one returned by
    /// [`RunController::load_checkpoint`].
    pub fn from_context(
        actions: Vec<Action>,
        context: ExecutionContext,
        executor: Arc<dyn ActionExecutor>,
        controller: RunController,
    ) -> Self {
        Self {
            actions: actions.into(),
            context,
            executor,
            controller,
        }
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Runs until the end of the list, a `STOP`, a fatal error, or an external stop.
    ///
    /// Fails only when the controller cannot be started.
    pub async fn run(mut self) -> Result<RunReport, EngineError> {
        let total = self.actions.len();
        self.controller.start(total)?;
        self.context.stop_flag = false;
        info!(
            total_actions = total,
            instruction_pointer = self.context.instruction_pointer,
            continue_on_error = self.context.continue_on_error,
            "sequence run started"
        );
        self.controller.emit(RunEvent::RunStarted {
            total_actions: total,
            instruction_pointer: self.context.instruction_pointer,
            at: Utc::now(),
        });

        let state = self.drive().await;

        self.controller.finish(&self.context, total);
        let error_count = self.context.errors.len();
        info!(state = %state, error_count, outputs = self.context.outputs.len(), "sequence run finished");
        self.controller.emit(RunEvent::RunFinished {
            state,
            finished_at: Utc::now(),
            error_count,
        });

        let ExecutionContext {
            instruction_pointer,
            outputs,
            errors,
            variables,
            ..
        } = self.context;
        Ok(RunReport {
            state,
            instruction_pointer,
            outputs,
            errors,
            variables,
            terminal_error: self.controller.terminal_error(),
        })
    }

    async fn drive(&mut self) -> RunState {
        let total = self.actions.len();
        loop {
            if let Boundary::Halt(state) = self.controller.checkpoint_boundary(&self.context, total).await {
                return state;
            }

            if self.context.instruction_pointer >= total {
                if let Some(block) = self.context.block_stack.current() {
                    let error = EngineError::UnterminatedBlock {
                        kind: block.kind,
                        start_index: block.start_index,
                    };
                    self.context.record_error(total, error.clone());
                    self.controller.fail(error);
                    return self.controller.state();
                }
                if self.controller.complete() {
                    return RunState::Completed;
                }
                // A pause or stop arrived first; settle it at the boundary.
                continue;
            }

            let index = self.context.instruction_pointer;
            match self.step(index).await {
                Ok(Flow::Next(outcome)) => self.emit_progress(index, outcome),
                Ok(Flow::Stop) => {
                    self.emit_progress(index, ProgressOutcome::Control);
                    self.controller.stop_with_message(false, "STOP action reached");
                    return self.controller.state();
                }
                Err(error) => {
                    warn!(action_index = index, error = %error, "run aborted");
                    self.context.record_error(index, error.clone());
                    self.emit_progress(
                        index,
                        ProgressOutcome::Error {
                            message: error.to_string(),
                        },
                    );
                    self.controller.fail(error);
                    return self.controller.state();
                }
            }
        }
    }

    /// Executes the action at `index` and advances the pointer.
    async fn step(&mut self, index: usize) -> Result<Flow, EngineError> {
        let actions = Arc::clone(&self.actions);
        let action = &actions[index];
        debug!(action_index = index, kind = %action.kind, "dispatching action");

        let flow = match action.kind {
            ActionKind::Navigate
            | ActionKind::Refresh
            | ActionKind::GoBack
            | ActionKind::GoForward
            | ActionKind::Click
            | ActionKind::DoubleClick
            | ActionKind::RightClick
            | ActionKind::Hover
            | ActionKind::TypeText
            | ActionKind::ClearInput
            | ActionKind::SelectOption
            | ActionKind::PressKey
            | ActionKind::Scroll
            | ActionKind::UploadFile
            | ActionKind::DownloadFile
            | ActionKind::Screenshot
            | ActionKind::ExtractText
            | ActionKind::ExtractAttribute
            | ActionKind::ExecuteScript
            | ActionKind::SwitchFrame
            | ActionKind::SwitchWindow
            | ActionKind::Wait
            | ActionKind::WaitForElement
            | ActionKind::CheckElementExists
            | ActionKind::CheckElementVisible
            | ActionKind::CheckText
            | ActionKind::CheckUrl => Flow::Next(self.execute_leaf(index, action).await?),
            ActionKind::SetVariable => Flow::Next(self.set_variable(index, action)?),
            ActionKind::Increment => Flow::Next(self.increment(index, action)?),
            ActionKind::Log => Flow::Next(self.log(index, action)),
            ActionKind::BlockIfBegin => Flow::Next(self.enter_conditional(&actions, index, action)?),
            ActionKind::BlockElif => Flow::Next(self.elif_branch(&actions, index, action)?),
            ActionKind::BlockElse => Flow::Next(self.else_branch(&actions, index)?),
            ActionKind::BlockIfEnd => Flow::Next(self.close_conditional(index)?),
            ActionKind::BlockWhileBegin => Flow::Next(self.enter_loop(&actions, index, action)?),
            ActionKind::BlockWhileEnd => Flow::Next(self.loop_back(index)?),
            ActionKind::Break => Flow::Next(self.break_loop(&actions, index)?),
            ActionKind::Continue => Flow::Next(self.continue_loop(index)?),
            ActionKind::Stop => {
                self.context.stop_flag = true;
                info!(action_index = index, "STOP action reached");
                Flow::Stop
            }
        };

        if self.context.should_increment {
            self.context.instruction_pointer += 1;
        }
        self.context.should_increment = true;
        Ok(flow)
    }

    fn emit_progress(&self, index: usize, outcome: ProgressOutcome) {
        self.controller.emit(RunEvent::ActionFinished(ProgressUpdate {
            index,
            total: self.actions.len(),
            outcome,
        }));
    }

    /// Records a policy-gated error, or hands it back as fatal under fail-fast.
    fn gate(&mut self, index: usize, error: EngineError) -> Result<ProgressOutcome, EngineError> {
        if !self.context.continue_on_error {
            return Err(error);
        }
        warn!(action_index = index, error = %error, "continuing after error");
        let message = error.to_string();
        self.context.record_error(index, error);
        Ok(ProgressOutcome::Error { message })
    }

    fn record_output(&mut self, index: usize, action: &Action, value: Value) -> ProgressOutcome {
        let key = action.output_key(index);
        self.context.record_output(index, key.clone(), value.clone());
        ProgressOutcome::Output { key, value }
    }

    async fn execute_leaf(&mut self, index: usize, action: &Action) -> Result<ProgressOutcome, EngineError> {
        let target = action.target.as_deref().map(|target| self.context.variables.substitute(target));
        let payload = action.payload.as_ref().map(|payload| self.context.variables.substitute_value(payload));

        match self.executor.execute(action, target.as_deref(), payload.as_ref()).await {
            Ok(output) => {
                if action.kind.is_check() {
                    let passed = output
                        .passed
                        .unwrap_or_else(|| output.value.as_bool().unwrap_or(true));
                    debug!(action_index = index, passed, "check recorded");
                    self.context.last_check_result = Some(CheckResult {
                        passed,
                        action_index: index,
                        detail: None,
                    });
                }
                if let Some(variable) = &action.store_as {
                    self.context.variables.set(variable.clone(), output.value.clone());
                }
                Ok(self.record_output(index, action, output.value))
            }
            Err(error) => {
                let message = error.to_string();
                if action.kind.is_check() {
                    self.context.last_check_result = Some(CheckResult {
                        passed: false,
                        action_index: index,
                        detail: Some(message.clone()),
                    });
                }
                let error = EngineError::Executor {
                    index,
                    kind: action.kind,
                    message,
                };
                self.gate(index, error)
            }
        }
    }

    fn variable_name(&self, index: usize, action: &Action) -> Result<String, EngineError> {
        match action.target.as_deref().map(|target| self.context.variables.substitute(target)) {
            Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
            _ => Err(EngineError::Executor {
                index,
                kind: action.kind,
                message: "a target variable name is required".to_string(),
            }),
        }
    }

    fn set_variable(&mut self, index: usize, action: &Action) -> Result<ProgressOutcome, EngineError> {
        let name = match self.variable_name(index, action) {
            Ok(name) => name,
            Err(error) => return self.gate(index, error),
        };
        let value = action
            .payload
            .as_ref()
            .map(|payload| self.context.variables.substitute_value(payload))
            .unwrap_or(Value::Null);
        debug!(action_index = index, variable = %name, "variable set");
        self.context.variables.set(name, value.clone());
        Ok(self.record_output(index, action, value))
    }

    fn increment(&mut self, index: usize, action: &Action) -> Result<ProgressOutcome, EngineError> {
        let name = match self.variable_name(index, action) {
            Ok(name) => name,
            Err(error) => return self.gate(index, error),
        };
        let amount = action
            .payload
            .as_ref()
            .map(|payload| self.context.variables.substitute_value(payload))
            .unwrap_or_else(|| Value::from(1));
        match self.context.variables.increment(&name, &amount) {
            Ok(value) => Ok(self.record_output(index, action, value)),
            Err(error) => {
                warn!(action_index = index, error = %error, "increment skipped");
                let message = error.to_string();
                self.context.record_error(index, error);
                Ok(ProgressOutcome::Error { message })
            }
        }
    }

    fn log(&mut self, index: usize, action: &Action) -> ProgressOutcome {
        let message = match (&action.payload, &action.label) {
            (Some(payload), _) => format_value(&self.context.variables.substitute_value(payload)),
            (None, Some(label)) => self.context.variables.substitute(label),
            (None, None) => String::new(),
        };
        info!(action_index = index, message = %message, "sequence log");
        self.record_output(index, action, Value::String(message))
    }

    /// Evaluates a marker's condition; a marker without one counts as false.
    fn marker_condition(&mut self, index: usize, action: &Action) -> bool {
        match action.condition_text() {
            Some(condition) => self.context.evaluate_condition(condition, index),
            None => {
                self.context
                    .record_error(index, EngineError::condition("", format!("{} has no condition", action.kind)));
                false
            }
        }
    }

    fn enter_conditional(&mut self, actions: &[Action], index: usize, action: &Action) -> Result<ProgressOutcome, EngineError> {
        let end = find_block_end(actions, index, BlockKind::Conditional)?;
        let met = self.marker_condition(index, action);
        let block = self
            .context
            .block_stack
            .push(BlockKind::Conditional, index, action.condition_text().map(str::to_string));
        block.end_index = Some(end);
        block.condition_met = met;
        block.has_executed = met;

        if !met {
            let next = find_next_branch(actions, index, index)?;
            self.context.jump_to(next);
        }
        debug!(action_index = index, condition_met = met, "conditional entered");
        Ok(ProgressOutcome::Control)
    }

    /// Returns `(start_index, end_index, has_executed, else_seen)` of the innermost block,
    /// which must be a conditional.
    fn current_conditional(&mut self, actions: &[Action], index: usize, marker: &str) -> Result<(usize, usize, bool, bool), EngineError> {
        let block = match self.context.block_stack.current_mut() {
            Some(block) if block.kind == BlockKind::Conditional => block,
            Some(_) => return Err(EngineError::unbalanced(index, format!("{marker} inside an open loop"))),
            None => return Err(EngineError::unbalanced(index, format!("{marker} without an open IF"))),
        };
        let end = match block.end_index {
            Some(end) => end,
            None => {
                let end = find_block_end(actions, block.start_index, BlockKind::Conditional)?;
                block.end_index = Some(end);
                end
            }
        };
        Ok((block.start_index, end, block.has_executed, block.else_seen))
    }

    fn elif_branch(&mut self, actions: &[Action], index: usize, action: &Action) -> Result<ProgressOutcome, EngineError> {
        let (start, end, has_executed, else_seen) = self.current_conditional(actions, index, "ELIF")?;
        if else_seen {
            return Err(EngineError::unbalanced(index, "ELIF after ELSE"));
        }
        if has_executed {
            self.context.jump_to(end);
            return Ok(ProgressOutcome::Control);
        }

        let met = self.marker_condition(index, action);
        if let Some(block) = self.context.block_stack.current_mut() {
            block.condition = action.condition_text().map(str::to_string);
            block.condition_met = met;
            block.has_executed = met;
        }
        if !met {
            let next = find_next_branch(actions, index, start)?;
            self.context.jump_to(next);
        }
        debug!(action_index = index, condition_met = met, "elif evaluated");
        Ok(ProgressOutcome::Control)
    }

    fn else_branch(&mut self, actions: &[Action], index: usize) -> Result<ProgressOutcome, EngineError> {
        let (_, end, has_executed, else_seen) = self.current_conditional(actions, index, "ELSE")?;
        if else_seen {
            return Err(EngineError::unbalanced(index, "duplicate ELSE"));
        }
        if let Some(block) = self.context.block_stack.current_mut() {
            block.else_seen = true;
            if !has_executed {
                block.condition_met = true;
                block.has_executed = true;
            }
        }
        if has_executed {
            self.context.jump_to(end);
        }
        Ok(ProgressOutcome::Control)
    }

    fn close_conditional(&mut self, index: usize) -> Result<ProgressOutcome, EngineError> {
        match self.context.block_stack.current() {
            Some(block) if block.kind == BlockKind::Conditional => {}
            Some(block) => {
                return Err(EngineError::unbalanced(
                    index,
                    format!("IF_END would close the loop opened at {}", block.start_index),
                ));
            }
            None => return Err(EngineError::unbalanced(index, "IF_END without an open IF")),
        }
        self.context.block_stack.pop(index)?;
        Ok(ProgressOutcome::Control)
    }

    fn enter_loop(&mut self, actions: &[Action], index: usize, action: &Action) -> Result<ProgressOutcome, EngineError> {
        let reentry = matches!(
            self.context.block_stack.current(),
            Some(block) if block.kind == BlockKind::Loop && block.start_index == index
        );
        if !reentry {
            let end = find_block_end(actions, index, BlockKind::Loop)?;
            let block = self
                .context
                .block_stack
                .push(BlockKind::Loop, index, action.condition_text().map(str::to_string));
            block.end_index = Some(end);
        }
        self.context.continue_flag = false;

        let met = self.marker_condition(index, action);
        let limit = self.context.max_loop_iterations;
        let Some(block) = self.context.block_stack.current_mut() else {
            return Err(EngineError::unbalanced(index, "WHILE without an open loop block"));
        };
        block.condition_met = met;
        if met && block.iteration_count < limit {
            block.iteration_count += 1;
            debug!(action_index = index, iteration = block.iteration_count, "loop iteration");
            return Ok(ProgressOutcome::Control);
        }

        let end = match block.end_index {
            Some(end) => end,
            None => find_block_end(actions, index, BlockKind::Loop)?,
        };
        self.exit_loop(index, end)?;
        if met {
            return self.gate(index, EngineError::LoopLimit { start_index: index, limit });
        }
        Ok(ProgressOutcome::Control)
    }

    /// Pops the innermost loop and continues after its `WHILE_END`.
    fn exit_loop(&mut self, index: usize, end: usize) -> Result<(), EngineError> {
        let block = self.context.block_stack.pop(index)?;
        self.context.jump_to(end + 1);
        debug!(start_index = block.start_index, iterations = block.iteration_count, "loop exited");
        self.controller.emit(RunEvent::LoopExited {
            start_index: block.start_index,
            iterations: block.iteration_count,
        });
        Ok(())
    }

    fn loop_back(&mut self, index: usize) -> Result<ProgressOutcome, EngineError> {
        let start = match self.context.block_stack.current() {
            Some(block) if block.kind == BlockKind::Loop => block.start_index,
            Some(block) => {
                return Err(EngineError::unbalanced(
                    index,
                    format!("WHILE_END would close the conditional opened at {}", block.start_index),
                ));
            }
            None => return Err(EngineError::unbalanced(index, "WHILE_END without an open WHILE")),
        };
        self.context.jump_to(start);
        Ok(ProgressOutcome::Control)
    }

    fn break_loop(&mut self, actions: &[Action], index: usize) -> Result<ProgressOutcome, EngineError> {
        let position = self
            .context
            .block_stack
            .innermost_loop_depth()
            .ok_or_else(|| EngineError::unbalanced(index, "BREAK outside of a loop"))?;
        self.context.break_flag = true;
        self.context.block_stack.truncate_above(position);

        let end = match self.context.block_stack.current() {
            Some(block) => match block.end_index {
                Some(end) => end,
                None => find_block_end(actions, block.start_index, BlockKind::Loop)?,
            },
            None => return Err(EngineError::unbalanced(index, "BREAK outside of a loop")),
        };
        self.exit_loop(index, end)?;
        self.context.break_flag = false;
        Ok(ProgressOutcome::Control)
    }

    fn continue_loop(&mut self, index: usize) -> Result<ProgressOutcome, EngineError> {
        let position = self
            .context
            .block_stack
            .innermost_loop_depth()
            .ok_or_else(|| EngineError::unbalanced(index, "CONTINUE outside of a loop"))?;
        self.context.continue_flag = true;
        self.context.block_stack.truncate_above(position);
        let start = self
            .context
            .block_stack
            .current()
            .map(|block| block.start_index)
            .ok_or_else(|| EngineError::unbalanced(index, "CONTINUE outside of a loop"))?;
        self.context.jump_to(start);
        Ok(ProgressOutcome::Control)
    }
}
