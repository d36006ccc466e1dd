//! Filesystem helpers and checkpoint storage shared by the Stepwise engine and hosts.

pub mod checkpoint_store;
pub mod paths;

pub use checkpoint_store::{
    CHECKPOINT_DIR_ENV, CheckpointStore, CheckpointStoreError, InMemoryCheckpointStore, JsonFileCheckpointStore,
    default_checkpoint_dir, validate_checkpoint_id,
};
pub use paths::{env_or_config_dir, expand_tilde};
