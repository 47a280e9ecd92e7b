//! Sink module for persisting harvest output
//!
//! A sink stores two things:
//! - Artifacts (downloaded judgment files), moved into durable storage
//! - Structured result records, deduplicated by natural key
//!
//! The sink is acquired once at startup and wrapped in a [`SinkGuard`] so it
//! is released on every exit path.

mod artifacts;
mod database;

pub use artifacts::ArtifactStore;
pub use database::DatabaseSink;

use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while writing to a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink is closed")]
    Closed,
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// How handling of one portal row ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Metadata extracted and artifact stored
    Complete,
    /// Metadata extracted but no artifact could be stored
    MissingArtifact { reason: String },
    /// Handling the row failed
    Failed { message: String },
}

impl RecordOutcome {
    /// Status string persisted alongside the record
    pub fn status(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::MissingArtifact { .. } => "missing_artifact",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Complete => None,
            Self::MissingArtifact { reason } => Some(reason),
            Self::Failed { message } => Some(message),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One structured output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub natural_key: String,
    pub court: String,
    pub fields: BTreeMap<String, String>,
    pub artifact_url: Option<String>,
    pub outcome: RecordOutcome,
    pub harvested_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Derives the deduplication key of a portal row
    ///
    /// Rows with an artifact path are keyed by that path, others by their
    /// HTML.
    pub fn natural_key_for(artifact_path: Option<&str>, html: &str) -> String {
        let mut hasher = Sha256::new();
        match artifact_path {
            Some(path) => hasher.update(path.as_bytes()),
            None => hasher.update(html.as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// A failure marker for a row whose handling errored
    pub fn failed(natural_key: String, court: &str, message: impl Into<String>) -> Self {
        Self {
            natural_key,
            court: court.to_string(),
            fields: BTreeMap::new(),
            artifact_url: None,
            outcome: RecordOutcome::Failed {
                message: message.into(),
            },
            harvested_at: Utc::now(),
        }
    }
}

/// Result of a bulk insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    /// Failure markers superseded by the new record
    pub replaced: usize,
    pub duplicates: usize,
    /// Records the store refused, with the reason
    pub rejected: Vec<String>,
}

impl InsertReport {
    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }

    pub fn merge(&mut self, other: InsertReport) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.duplicates += other.duplicates;
        self.rejected.extend(other.rejected);
    }
}

/// Destination for artifacts and result records
///
/// `insert_records` is an unordered, best-effort bulk write: one record's
/// rejection never prevents the others from being written.
pub trait Sink: Send + Sync {
    /// Moves a local artifact into storage and returns its durable location
    ///
    /// The local copy is gone once this returns Ok.
    fn upload_artifact(&self, local_path: &Path) -> SinkResult<String>;

    fn insert_records(&self, records: &[ResultRecord]) -> SinkResult<InsertReport>;

    /// Releases the sink; later writes fail with [`SinkError::Closed`]
    fn close(&self) -> SinkResult<()>;
}

impl<K: Sink + ?Sized> Sink for Arc<K> {
    fn upload_artifact(&self, local_path: &Path) -> SinkResult<String> {
        (**self).upload_artifact(local_path)
    }

    fn insert_records(&self, records: &[ResultRecord]) -> SinkResult<InsertReport> {
        (**self).insert_records(records)
    }

    fn close(&self) -> SinkResult<()> {
        (**self).close()
    }
}

/// Closes the wrapped sink when dropped
pub struct SinkGuard<K: Sink> {
    sink: Arc<K>,
    released: bool,
}

impl<K: Sink> SinkGuard<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink: Arc::new(sink),
            released: false,
        }
    }

    /// Shared handle for components that write to the sink
    pub fn handle(&self) -> Arc<K> {
        Arc::clone(&self.sink)
    }

    /// Closes the sink now, surfacing any error
    pub fn release(mut self) -> SinkResult<()> {
        self.released = true;
        self.sink.close()
    }
}

impl<K: Sink> Drop for SinkGuard<K> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.sink.close() {
            tracing::error!("Failed to close sink: {}", e);
        }
    }
}
