//! Run controller: the state machine that gates one interpreter run.
//!
//! ```text
//! Idle -> Running <-> Paused -> { Stopped, Completed, Failed }
//! ```
//!
//! The controller is a cheap [`Clone`] handle shared between the interpreter task and
//! whoever drives it (a CLI signal handler, a UI, or the executor itself). All state lives
//! behind one [`tokio::sync::watch`] channel: transitions are applied atomically with
//! `send_if_modified`, and the interpreter awaits change notifications while paused
//! instead of polling.
//!
//! The interpreter observes the state only at action boundaries. While parked at a
//! boundary it publishes a snapshot of its context, which is what
//! [`RunController::save_checkpoint`] persists.

use std::sync::Arc;

use stepwise_types::{Action, RunEvent, RunState};
use stepwise_util::CheckpointStore;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::{debug, info, warn};

use crate::{checkpoint::ContextSnapshot, context::ExecutionContext, errors::EngineError};

#[derive(Debug, Clone, Default)]
struct ControllerView {
    state: RunState,
    /// Context snapshot published by a parked (paused or gracefully stopped) interpreter.
    parked: Option<Arc<ContextSnapshot>>,
    emergency: bool,
    started: bool,
    finished: bool,
    terminal_error: Option<EngineError>,
}

/// What the interpreter should do after an action-boundary check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Boundary {
    Proceed,
    Halt(RunState),
}

/// Shared handle controlling one run.
///
/// Attach the event sink with [`RunController::with_events`] before cloning the handle.
#[derive(Clone)]
pub struct RunController {
    view: Arc<watch::Sender<ControllerView>>,
    store: Arc<dyn CheckpointStore>,
    events: Option<UnboundedSender<RunEvent>>,
}

impl RunController {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            view: Arc::new(watch::Sender::new(ControllerView::default())),
            store,
            events: None,
        }
    }

    /// Emits a `StatusChanged` event on `events` for every transition.
    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> RunState {
        self.view.borrow().state
    }

    /// Error that moved the run to `Failed`, if any.
    pub fn terminal_error(&self) -> Option<EngineError> {
        self.view.borrow().terminal_error.clone()
    }

    /// Idle -> Running. Called by the interpreter when a run begins.
    pub fn start(&self, total_actions: usize) -> Result<(), EngineError> {
        let mut rejected = None;
        self.view.send_if_modified(|view| {
            if view.state != RunState::Idle {
                rejected = Some(view.state);
                return false;
            }
            view.state = RunState::Running;
            view.started = true;
            true
        });
        if let Some(state) = rejected {
            return Err(EngineError::invalid_transition("start", state));
        }
        debug!(total_actions, "run controller started");
        self.emit_status(RunState::Running, None);
        Ok(())
    }

    /// Running -> Paused. Takes effect at the next action boundary; no-op otherwise.
    pub fn pause(&self) -> bool {
        let changed = self.transition(|state| state == RunState::Running, RunState::Paused);
        if changed {
            info!("run pause requested");
            self.emit_status(RunState::Paused, None);
        }
        changed
    }

    /// Paused -> Running. Discards the parked snapshot.
    pub fn resume(&self) -> bool {
        let changed = self.view.send_if_modified(|view| {
            if view.state != RunState::Paused {
                return false;
            }
            view.state = RunState::Running;
            view.parked = None;
            true
        });
        if changed {
            info!("run resumed");
            self.emit_status(RunState::Running, None);
        }
        changed
    }

    /// Any non-terminal state -> Stopped.
    ///
    /// A graceful stop lets the interpreter publish its final context so a checkpoint can
    /// still be saved. An emergency stop skips that, unless the run was already parked.
    pub fn stop(&self, emergency: bool) -> bool {
        let message = if emergency { "emergency stop requested" } else { "stop requested" };
        self.stop_with_message(emergency, message)
    }

    pub(crate) fn stop_with_message(&self, emergency: bool, message: &str) -> bool {
        let changed = self.view.send_if_modified(|view| {
            if view.state.is_terminal() {
                return false;
            }
            view.state = RunState::Stopped;
            view.emergency = emergency;
            true
        });
        if changed {
            info!(emergency, message, "run stopped");
            self.emit_status(RunState::Stopped, Some(message.to_string()));
        }
        changed
    }

    /// Running -> Completed. Fails when a pause or stop slipped in first.
    pub(crate) fn complete(&self) -> bool {
        let changed = self.transition(|state| state == RunState::Running, RunState::Completed);
        if changed {
            self.emit_status(RunState::Completed, None);
        }
        changed
    }

    /// Any non-terminal state -> Failed, recording `error`.
    pub(crate) fn fail(&self, error: EngineError) -> bool {
        let message = error.to_string();
        let changed = self.view.send_if_modified(|view| {
            if view.state.is_terminal() {
                return false;
            }
            view.state = RunState::Failed;
            view.terminal_error = Some(error);
            true
        });
        if changed {
            warn!(error = %message, "run failed");
            self.emit_status(RunState::Failed, Some(message));
        }
        changed
    }

    fn transition(&self, allowed: impl Fn(RunState) -> bool, next: RunState) -> bool {
        self.view.send_if_modified(|view| {
            if !allowed(view.state) {
                return false;
            }
            view.state = next;
            true
        })
    }

    /// Action-boundary check. Suspends while paused, publishing a snapshot of `context`
    /// for checkpointing, until the run is resumed or stopped.
    pub(crate) async fn checkpoint_boundary(&self, context: &ExecutionContext, action_count: usize) -> Boundary {
        let mut receiver = self.view.subscribe();
        loop {
            let state = receiver.borrow_and_update().state;
            match state {
                RunState::Running => return Boundary::Proceed,
                RunState::Paused => {
                    let published = self.view.send_if_modified(|view| {
                        if view.state != RunState::Paused || view.parked.is_some() {
                            return false;
                        }
                        view.parked = Some(Arc::new(ContextSnapshot::capture(context, action_count)));
                        true
                    });
                    if published {
                        debug!(instruction_pointer = context.instruction_pointer, "interpreter parked");
                    }
                    if receiver.changed().await.is_err() {
                        return Boundary::Halt(RunState::Stopped);
                    }
                }
                other => return Boundary::Halt(other),
            }
        }
    }

    /// Marks the interpreter as finished. After a graceful stop the final context becomes
    /// the parked snapshot.
    pub(crate) fn finish(&self, context: &ExecutionContext, action_count: usize) {
        self.view.send_modify(|view| {
            if view.state == RunState::Stopped && !view.emergency && view.parked.is_none() {
                view.parked = Some(Arc::new(ContextSnapshot::capture(context, action_count)));
            }
            view.finished = true;
        });
    }

    /// Waits until the interpreter has returned and reports the terminal state.
    ///
    /// Only meaningful once a run has been started with this controller.
    pub async fn wait_for_finish(&self) -> RunState {
        let mut receiver = self.view.subscribe();
        match receiver.wait_for(|view| view.finished).await {
            Ok(view) => view.state,
            Err(_) => self.state(),
        }
    }

    /// Waits until the run reaches `state` (or any terminal state) and returns the state
    /// observed.
    pub async fn wait_for_state(&self, state: RunState) -> RunState {
        let mut receiver = self.view.subscribe();
        match receiver.wait_for(|view| view.state == state || view.state.is_terminal()).await {
            Ok(view) => view.state,
            Err(_) => self.state(),
        }
    }

    /// Serializes the parked context and persists it under `id`.
    ///
    /// Valid while `Paused` or `Stopped`. When the interpreter has not reached a boundary
    /// yet this waits for it to park (or to finish after a stop).
    pub async fn save_checkpoint(&self, id: &str) -> Result<ContextSnapshot, EngineError> {
        let mut receiver = self.view.subscribe();
        let (state, parked) = {
            let view = receiver
                .wait_for(|view| {
                    view.parked.is_some()
                        || view.finished
                        || !view.started
                        || !matches!(view.state, RunState::Paused | RunState::Stopped)
                })
                .await
                .map_err(|_| EngineError::checkpoint(id, "run controller is gone"))?;
            (view.state, view.parked.clone())
        };

        if !matches!(state, RunState::Paused | RunState::Stopped) {
            return Err(EngineError::invalid_transition("save a checkpoint", state));
        }
        let snapshot = parked.ok_or_else(|| EngineError::checkpoint(id, format!("no context snapshot is available in state {state}")))?;

        let serialized = snapshot.to_json(id)?;
        self.store
            .persist(id, &serialized)
            .map_err(|error| EngineError::checkpoint(id, error.to_string()))?;
        info!(
            checkpoint_id = %id,
            instruction_pointer = snapshot.context.instruction_pointer,
            "checkpoint saved"
        );
        Ok(snapshot.as_ref().clone())
    }

    /// Retrieves the snapshot stored under `id` and validates it against `actions`.
    pub fn load_checkpoint(&self, id: &str, actions: &[Action]) -> Result<ExecutionContext, EngineError> {
        let serialized = self
            .store
            .retrieve(id)
            .map_err(|error| EngineError::checkpoint(id, error.to_string()))?
            .ok_or_else(|| EngineError::checkpoint(id, "not found"))?;
        let snapshot = ContextSnapshot::from_json(id, &serialized)?;
        snapshot.validate_against(id, actions)?;
        info!(
            checkpoint_id = %id,
            instruction_pointer = snapshot.context.instruction_pointer,
            saved_at = %snapshot.saved_at,
            "checkpoint loaded"
        );
        Ok(snapshot.context)
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn emit_status(&self, state: RunState, message: Option<String>) {
        self.emit(RunEvent::StatusChanged { state, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_util::InMemoryCheckpointStore;
    use tokio::sync::mpsc::unbounded_channel;

    fn controller() -> RunController {
        RunController::new(Arc::new(InMemoryCheckpointStore::default()))
    }

    #[test]
    fn lifecycle_transitions() {
        let controller = controller();
        assert_eq!(controller.state(), RunState::Idle);
        assert!(!controller.pause(), "pause is a no-op while idle");

        controller.start(3).unwrap();
        assert_eq!(controller.state(), RunState::Running);
        assert!(!controller.resume(), "resume requires paused");

        assert!(controller.pause());
        assert!(!controller.pause());
        assert_eq!(controller.state(), RunState::Paused);
        assert!(controller.resume());
        assert!(controller.complete());
        assert_eq!(controller.state(), RunState::Completed);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let controller = controller();
        controller.start(1).unwrap();
        assert!(controller.stop(false));
        assert!(!controller.stop(true));
        assert!(!controller.resume());
        assert!(!controller.complete());
        assert!(!controller.fail(EngineError::unbalanced(0, "late")));
        assert_eq!(controller.state(), RunState::Stopped);
        assert!(controller.terminal_error().is_none());

        let error = controller.start(1).expect_err("restart must fail");
        assert_eq!(error, EngineError::invalid_transition("start", RunState::Stopped));
    }

    #[test]
    fn complete_fails_when_pause_slipped_in() {
        let controller = controller();
        controller.start(1).unwrap();
        controller.pause();
        assert!(!controller.complete());
        assert_eq!(controller.state(), RunState::Paused);
    }

    #[test]
    fn fail_records_terminal_error() {
        let controller = controller();
        controller.start(1).unwrap();
        let error = EngineError::unbalanced(2, "IF_END without IF");
        assert!(controller.fail(error.clone()));
        assert_eq!(controller.state(), RunState::Failed);
        assert_eq!(controller.terminal_error(), Some(error));
    }

    #[test]
    fn transitions_emit_status_events() {
        let (sender, mut receiver) = unbounded_channel();
        let controller = controller().with_events(sender);
        controller.start(1).unwrap();
        controller.pause();
        controller.stop(false);

        let mut states = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let RunEvent::StatusChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![RunState::Running, RunState::Paused, RunState::Stopped]);
    }

    #[tokio::test]
    async fn paused_boundary_parks_and_resumes() {
        let controller = controller();
        controller.start(2).unwrap();
        controller.pause();

        let mut context = ExecutionContext::default();
        context.instruction_pointer = 1;
        let boundary = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.checkpoint_boundary(&context, 2).await })
        };

        let snapshot = controller.save_checkpoint("parked").await.unwrap();
        assert_eq!(snapshot.context.instruction_pointer, 1);
        assert_eq!(snapshot.action_count, 2);

        controller.resume();
        assert_eq!(boundary.await.unwrap(), Boundary::Proceed);
    }

    #[tokio::test]
    async fn stop_releases_parked_interpreter() {
        let controller = controller();
        controller.start(2).unwrap();
        controller.pause();
        let boundary = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.checkpoint_boundary(&ExecutionContext::default(), 2).await })
        };
        controller.save_checkpoint("before-stop").await.unwrap();
        controller.stop(true);
        assert_eq!(boundary.await.unwrap(), Boundary::Halt(RunState::Stopped));

        // The parked snapshot survives an emergency stop issued while paused.
        controller.save_checkpoint("after-stop").await.unwrap();
    }

    #[tokio::test]
    async fn save_checkpoint_rejects_running_and_emergency_stops() {
        let controller = controller();
        controller.start(2).unwrap();
        let error = controller.save_checkpoint("running").await.expect_err("running run");
        assert!(matches!(error, EngineError::InvalidTransition { .. }));

        controller.stop(true);
        controller.finish(&ExecutionContext::default(), 2);
        let error = controller.save_checkpoint("emergency").await.expect_err("emergency stop");
        assert!(matches!(error, EngineError::Checkpoint { .. }));
    }

    #[tokio::test]
    async fn graceful_stop_publishes_final_context() {
        let controller = controller();
        controller.start(4).unwrap();
        controller.stop(false);
        let mut context = ExecutionContext::default();
        context.instruction_pointer = 3;
        controller.finish(&context, 4);

        let snapshot = controller.save_checkpoint("final").await.unwrap();
        assert_eq!(snapshot.context.instruction_pointer, 3);
        assert_eq!(controller.wait_for_finish().await, RunState::Stopped);
    }

    #[test]
    fn load_checkpoint_reports_missing_ids() {
        let controller = controller();
        let error = controller.load_checkpoint("absent", &[]).expect_err("missing checkpoint");
        assert_eq!(error, EngineError::checkpoint("absent", "not found"));
    }
}
