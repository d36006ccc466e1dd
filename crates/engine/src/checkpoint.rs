//! Serialized execution-context snapshots.
//!
//! A snapshot is a JSON document `{ format_version, saved_at, action_count, context }`.
//! `action_count` ties the snapshot to the action list it was taken against; restoring
//! against a different list is rejected before any action runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stepwise_types::{Action, ActionKind};

use crate::{blocks::BlockKind, context::ExecutionContext, errors::EngineError};

/// Current snapshot layout version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSnapshot {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub action_count: usize,
    pub context: ExecutionContext,
}

impl ContextSnapshot {
    pub fn capture(context: &ExecutionContext, action_count: usize) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: Utc::now(),
            action_count,
            context: context.clone(),
        }
    }

    pub fn to_json(&self, id: &str) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|error| EngineError::checkpoint(id, format!("cannot serialize snapshot: {error}")))
    }

    pub fn from_json(id: &str, serialized: &str) -> Result<Self, EngineError> {
        let snapshot: Self =
            serde_json::from_str(serialized).map_err(|error| EngineError::checkpoint(id, format!("malformed snapshot: {error}")))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(EngineError::checkpoint(
                id,
                format!(
                    "unsupported snapshot format version {} (expected {SNAPSHOT_FORMAT_VERSION})",
                    snapshot.format_version
                ),
            ));
        }
        Ok(snapshot)
    }

    /// Checks that this snapshot can resume against `actions`.
    pub fn validate_against(&self, id: &str, actions: &[Action]) -> Result<(), EngineError> {
        if self.action_count != actions.len() {
            return Err(EngineError::checkpoint(
                id,
                format!(
                    "snapshot was taken against {} actions but the sequence has {}",
                    self.action_count,
                    actions.len()
                ),
            ));
        }
        let context = &self.context;
        if context.instruction_pointer > actions.len() {
            return Err(EngineError::checkpoint(
                id,
                format!("instruction pointer {} is out of bounds", context.instruction_pointer),
            ));
        }
        for block in context.block_stack.iter() {
            let expected = match block.kind {
                BlockKind::Conditional => ActionKind::BlockIfBegin,
                BlockKind::Loop => ActionKind::BlockWhileBegin,
            };
            let found = actions.get(block.start_index).map(|action| action.kind);
            if found != Some(expected) {
                return Err(EngineError::checkpoint(
                    id,
                    format!("open {} block does not start at a {expected} marker (index {})", block.kind, block.start_index),
                ));
            }
        }
        Ok(())
    }
}
