//! SQLite-backed sink

use crate::sink::{ArtifactStore, InsertReport, ResultRecord, Sink, SinkError, SinkResult};
use crate::storage::{InsertOutcome, RecordStore, SqliteStorage, StorageError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Artifacts on disk, records in the `records` table
pub struct DatabaseSink {
    artifacts: ArtifactStore,
    storage: Mutex<SqliteStorage>,
    closed: AtomicBool,
}

impl DatabaseSink {
    pub fn new(artifacts: ArtifactStore, storage: SqliteStorage) -> Self {
        Self {
            artifacts,
            storage: Mutex::new(storage),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens the record database at `database_path`
    pub fn open(database_path: &Path, artifacts: ArtifactStore) -> SinkResult<Self> {
        let storage = SqliteStorage::new(database_path)?;
        Ok(Self::new(artifacts, storage))
    }

    fn ensure_open(&self) -> SinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> SinkResult<MutexGuard<'_, SqliteStorage>> {
        self.storage
            .lock()
            .map_err(|_| SinkError::Unavailable("record storage lock poisoned".to_string()))
    }
}

impl Sink for DatabaseSink {
    fn upload_artifact(&self, local_path: &Path) -> SinkResult<String> {
        self.ensure_open()?;
        self.artifacts.store(local_path)
    }

    fn insert_records(&self, records: &[ResultRecord]) -> SinkResult<InsertReport> {
        self.ensure_open()?;
        let storage = self.lock()?;
        let mut report = InsertReport::default();

        for record in records {
            match storage.insert_record(record) {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,
                Ok(InsertOutcome::Replaced) => report.replaced += 1,
                Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
                Err(StorageError::InvalidRecord(reason)) => report.rejected.push(reason),
                Err(e) => {
                    report
                        .rejected
                        .push(format!("{}: {}", record.natural_key, e));
                }
            }
        }

        Ok(report)
    }

    fn close(&self) -> SinkResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Record sink closed");
        }
        Ok(())
    }
}
