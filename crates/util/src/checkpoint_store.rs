//! Checkpoint persistence for paused or stopped runs.
//!
//! The engine owns the snapshot format; stores only move opaque serialized text keyed by a
//! checkpoint identifier. The JSON file store keeps one file per checkpoint under a
//! directory resolved like the other config-backed paths in this crate (env override,
//! tilde expansion, config directory fallback).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::paths::{env_or_config_dir, expand_tilde};

/// Environment variable controlling the checkpoint directory.
pub const CHECKPOINT_DIR_ENV: &str = "STEPWISE_CHECKPOINT_DIR";

/// Extension used for checkpoint files written by [`JsonFileCheckpointStore`].
pub const CHECKPOINT_FILE_EXTENSION: &str = "json";

/// Errors surfaced by checkpoint store operations.
#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    /// I/O failure while reading or writing a checkpoint.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Identifier cannot be mapped to a storage key.
    #[error("invalid checkpoint id '{id}': only ASCII letters, digits, '-', '_' and '.' are allowed")]
    InvalidId { id: String },
}

/// Storage backend for serialized execution-context snapshots.
pub trait CheckpointStore: Send + Sync {
    /// Store `serialized_context` under `id`, replacing any previous value.
    fn persist(&self, id: &str, serialized_context: &str) -> Result<(), CheckpointStoreError>;

    /// Fetch the serialized context stored under `id`, if any.
    fn retrieve(&self, id: &str) -> Result<Option<String>, CheckpointStoreError>;

    /// List stored checkpoint identifiers in ascending order.
    fn list(&self) -> Result<Vec<String>, CheckpointStoreError>;

    /// Remove the checkpoint stored under `id`. Returns `true` when something was deleted.
    fn remove(&self, id: &str) -> Result<bool, CheckpointStoreError>;
}

/// Validates a checkpoint identifier so it can be used as a file stem.
pub fn validate_checkpoint_id(id: &str) -> Result<(), CheckpointStoreError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointStoreError::InvalidId { id: id.to_string() })
    }
}

/// Checkpoint store writing one JSON file per checkpoint.
pub struct JsonFileCheckpointStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    /// Create a store rooted at `directory` (or the default directory when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(directory: P) -> Self {
        let directory = match directory.into() {
            Some(directory) => expand_tilde(&directory.to_string_lossy()),
            None => default_checkpoint_dir(),
        };
        Self {
            directory,
            write_lock: Mutex::new(()),
        }
    }

    /// Initialize a store using the default directory.
    pub fn with_defaults() -> Self {
        Self::new(None::<PathBuf>)
    }

    /// Access the directory holding checkpoint files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, CheckpointStoreError> {
        validate_checkpoint_id(id)?;
        Ok(self.directory.join(format!("{id}.{CHECKPOINT_FILE_EXTENSION}")))
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn persist(&self, id: &str, serialized_context: &str) -> Result<(), CheckpointStoreError> {
        let path = self.path_for(id)?;
        let _guard = self.write_lock.lock().expect("checkpoint lock poisoned");
        fs::create_dir_all(&self.directory)?;

        // Staged write, then rename into place.
        let staging_path = path.with_extension(format!("{CHECKPOINT_FILE_EXTENSION}.tmp"));
        fs::write(&staging_path, serialized_context)?;
        fs::rename(&staging_path, &path)?;
        debug!(checkpoint_id = %id, path = %path.display(), "checkpoint persisted");
        Ok(())
    }

    fn retrieve(&self, id: &str) -> Result<Option<String>, CheckpointStoreError> {
        let path = self.path_for(id)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(CheckpointStoreError::Io(error)),
        }
    }

    fn list(&self) -> Result<Vec<String>, CheckpointStoreError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(CheckpointStoreError::Io(error)),
        };

        let mut identifiers = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|extension| extension.to_str()) != Some(CHECKPOINT_FILE_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) if validate_checkpoint_id(stem).is_ok() => identifiers.push(stem.to_string()),
                _ => warn!(path = %path.display(), "ignoring unrecognized file in checkpoint directory"),
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    fn remove(&self, id: &str) -> Result<bool, CheckpointStoreError> {
        let path = self.path_for(id)?;
        let _guard = self.write_lock.lock().expect("checkpoint lock poisoned");
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(CheckpointStoreError::Io(error)),
        }
    }
}

/// In-memory checkpoint store used by tests and short-lived hosts.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn persist(&self, id: &str, serialized_context: &str) -> Result<(), CheckpointStoreError> {
        validate_checkpoint_id(id)?;
        let mut entries = self.entries.lock().expect("checkpoint lock poisoned");
        entries.insert(id.to_string(), serialized_context.to_string());
        Ok(())
    }

    fn retrieve(&self, id: &str) -> Result<Option<String>, CheckpointStoreError> {
        let entries = self.entries.lock().expect("checkpoint lock poisoned");
        Ok(entries.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<String>, CheckpointStoreError> {
        let entries = self.entries.lock().expect("checkpoint lock poisoned");
        Ok(entries.keys().cloned().collect())
    }

    fn remove(&self, id: &str) -> Result<bool, CheckpointStoreError> {
        let mut entries = self.entries.lock().expect("checkpoint lock poisoned");
        Ok(entries.remove(id).is_some())
    }
}

/// Returns the checkpoint directory, honoring [`CHECKPOINT_DIR_ENV`].
pub fn default_checkpoint_dir() -> PathBuf {
    env_or_config_dir(CHECKPOINT_DIR_ENV, &["stepwise", "checkpoints"])
}
