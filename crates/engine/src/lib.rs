//! # Stepwise Engine
//!
//! The Stepwise Engine interprets flat lists of declarative automation actions. Structured
//! control flow (`IF`/`ELIF`/`ELSE`, `WHILE`, `BREAK`, `CONTINUE`, `STOP`) is encoded as
//! marker actions, and the engine turns them into correct execution while it tracks
//! variables, open blocks, outputs, and errors.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use stepwise_engine::{EchoExecutor, RunController, RunOptions, SequenceInterpreter};
//! use stepwise_types::{Action, ActionKind, RunState};
//! use stepwise_util::InMemoryCheckpointStore;
//!
//! # tokio::runtime::Runtime::new()?.block_on(async {
//! let actions = vec![
//!     Action::set_variable("total", 0),
//!     Action::while_begin("${total} < 3"),
//!     Action::increment("total", 1),
//!     Action::new(ActionKind::BlockWhileEnd),
//! ];
//! let controller = RunController::new(Arc::new(InMemoryCheckpointStore::new()));
//! let interpreter = SequenceInterpreter::new(actions, RunOptions::default(), Arc::new(EchoExecutor), controller);
//! let report = interpreter.run().await?;
//! assert_eq!(report.state, RunState::Completed);
//! assert_eq!(report.variables.get("total", serde_json::Value::Null), serde_json::json!(3));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`variables`**: the variable environment and `${name}` substitution
//! - **`blocks`**: the block stack and block matching over action lists
//! - **`condition`**: the constrained condition grammar
//! - **`context`**: the serializable execution context
//! - **`interpreter`**: the dispatch loop
//! - **`controller`**: the run state machine, pause/resume, and checkpoints
//! - **`executor`**: the async boundary to whatever performs leaf actions

use std::{fs, path::Path};

use anyhow::{Context, Result};

pub mod blocks;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod controller;
pub mod document;
pub mod errors;
pub mod executor;
pub mod interpreter;
pub mod variables;

pub use blocks::{BlockInfo, BlockKind, BlockStack, find_block_end, find_next_branch};
pub use checkpoint::{ContextSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use condition::{CheckResult, evaluate_condition, evaluate_condition_with};
pub use context::{DEFAULT_MAX_LOOP_ITERATIONS, ExecutionContext, OutputRecord, RecordedError};
pub use controller::RunController;
pub use document::SequenceDocument;
pub use errors::EngineError;
pub use executor::{ActionExecutor, ActionOutput, EchoExecutor, ExecutorError};
pub use interpreter::{RunOptions, RunReport, SequenceInterpreter};
pub use variables::VariableEnvironment;

/// Loads a sequence document from the filesystem.
///
/// YAML is a superset of JSON, so both formats go through the YAML parser regardless of
/// the file extension.
///
/// # Errors
///
/// Fails when the file cannot be read or does not describe a sequence document.
///
/// # Examples
///
/// ```rust
/// use stepwise_engine::parse_sequence_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let document_path = temp_dir.path().join("sequence.yaml");
/// std::fs::write(&document_path, r#"
/// name: "smoke"
/// actions:
///   - kind: NAVIGATE
///     target: "https://example.com"
/// "#)?;
///
/// let document = parse_sequence_file(&document_path)?;
/// assert_eq!(document.actions.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_sequence_file(file_path: impl AsRef<Path>) -> Result<SequenceDocument> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read sequence file: {}", file_path.display()))?;
    let content_string = String::from_utf8_lossy(&file_content);
    parse_sequence_str(&content_string).with_context(|| format!("Invalid sequence document: {}", file_path.display()))
}

/// Parses a sequence document from YAML or JSON text.
pub fn parse_sequence_str(content: &str) -> Result<SequenceDocument> {
    let document: SequenceDocument = serde_yaml::from_str(content).context("Unsupported sequence document format")?;
    if document.actions.is_empty() {
        tracing::warn!(name = document.display_name(), "sequence document has no actions");
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequence_file_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let document_path = temp_dir.path().join("sequence.yaml");
        let content = r##"
name: "checkout"
continue_on_error: true
max_loop_iterations: 50
actions:
  - kind: CLICK
    target: "#buy"
    label: buy
  - kind: STOP
"##;
        fs::write(&document_path, content).unwrap();

        let document = parse_sequence_file(&document_path).expect("parse sequence document");
        assert_eq!(document.display_name(), "checkout");
        assert!(document.continue_on_error);
        assert_eq!(document.max_loop_iterations, 50);
        assert_eq!(document.actions[0].label.as_deref(), Some("buy"));
    }

    #[test]
    fn test_parse_sequence_file_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let document_path = temp_dir.path().join("sequence.json");
        let content = r#"{"actions": [{"kind": "SET_VARIABLE", "target": "x", "payload": 1}]}"#;
        fs::write(&document_path, content).unwrap();

        let document = parse_sequence_file(&document_path).expect("parse json document");
        assert_eq!(document.display_name(), "sequence");
        assert_eq!(document.actions.len(), 1);
    }

    #[test]
    fn test_parse_sequence_rejects_unknown_kinds() {
        let error = parse_sequence_str("actions:\n  - kind: TELEPORT\n").expect_err("unknown kind");
        assert!(format!("{error:#}").contains("TELEPORT"));
    }

    #[test]
    fn test_parse_sequence_file_missing() {
        let error = parse_sequence_file("/definitely/not/here.yaml").expect_err("missing file");
        assert!(error.to_string().contains("Failed to read sequence file"));
    }
}
