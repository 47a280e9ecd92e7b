//! Storage traits and error types
//!
//! This module defines the trait interfaces for storage backends and
//! associated error types.

use crate::checkpoint::{CheckpointKey, ShardState};
use crate::sink::ResultRecord;
use crate::storage::{InsertOutcome, RunRecord, RunStatus};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Shard {0} is already completed")]
    Completed(String),

    #[error("Checkpoint {key} was partitioned for {stored} shards, not {requested}")]
    ShardMismatch {
        key: String,
        stored: usize,
        requested: usize,
    },

    #[error("Checkpoint {key} was recorded with {stored}, not {requested}")]
    LayoutMismatch {
        key: String,
        stored: String,
        requested: String,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable home of shard checkpoints
///
/// `save_shard_state` is a full overwrite and must be durable when it
/// returns; callers proceed only after it does.
pub trait CheckpointStore {
    /// Loads the checkpoint for `key`; None means the shard never ran
    fn load_shard_state(&self, key: &CheckpointKey) -> StorageResult<Option<ShardState>>;

    /// Overwrites the checkpoint for the state's key
    fn save_shard_state(&mut self, state: &ShardState) -> StorageResult<()>;

    /// Removes the checkpoint for `key`, returning whether one existed
    fn delete_shard_state(&mut self, key: &CheckpointKey) -> StorageResult<bool>;
}

/// Bookkeeping of process invocations against a shard
pub trait RunLog {
    /// Creates a new run for the shard key and returns its id
    fn create_run(&mut self, state_key: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Most recent runs for a shard key, newest first
    fn recent_runs(&self, state_key: &str, limit: usize) -> StorageResult<Vec<RunRecord>>;
}

/// Structured record persistence keyed by natural key
pub trait RecordStore {
    /// Inserts one record
    ///
    /// A record whose natural key already exists is a duplicate, unless the
    /// stored row is a failure marker, or lacks its artifact and the new
    /// record is complete; such rows are replaced.
    fn insert_record(&self, record: &ResultRecord) -> StorageResult<InsertOutcome>;

    /// Record counts grouped by stored status
    fn count_records_by_status(&self) -> StorageResult<BTreeMap<String, u64>>;

    /// Total number of stored records
    fn count_records(&self) -> StorageResult<u64>;
}
