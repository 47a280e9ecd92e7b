//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.

use crate::checkpoint::{
    decode_year_counts, encode_year_counts, CheckpointKey, ShardState, TraversalLayout,
};
use crate::sink::ResultRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, RecordStore, RunLog, StorageError, StorageResult};
use crate::storage::{InsertOutcome, RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

/// Raw `shard_states` row before decoding
struct ShardRow {
    state_code: String,
    shard_id: i64,
    shard_count: i64,
    layout: [Option<i64>; 4],
    year_index: i64,
    window_index: i64,
    page_index: i64,
    batch_index: i64,
    completed: bool,
    year_counts: String,
    last_updated: String,
}

impl ShardRow {
    fn into_state(self) -> StorageResult<ShardState> {
        let last_updated = DateTime::parse_from_rfc3339(&self.last_updated)
            .map_err(|e| StorageError::Serialization(format!("invalid last_updated: {}", e)))?
            .with_timezone(&Utc);

        Ok(ShardState {
            state_code: self.state_code,
            shard_id: to_index(self.shard_id)?,
            shard_count: to_index(self.shard_count)?,
            layout: decode_layout(self.layout)?,
            current_year_index: to_index(self.year_index)?,
            current_window_index: to_index(self.window_index)?,
            current_page_index: to_index(self.page_index)?,
            current_batch_index: to_index(self.batch_index)?,
            completed: self.completed,
            year_counts: decode_year_counts(&self.year_counts)?,
            last_updated,
        })
    }
}

/// Layout columns are all set or all NULL
fn decode_layout(columns: [Option<i64>; 4]) -> StorageResult<Option<TraversalLayout>> {
    let [Some(non_sitting_days), Some(window_budget), Some(page_size), Some(batch_size)] = columns
    else {
        return Ok(None);
    };
    let to_u32 = |value: i64| {
        u32::try_from(value).map_err(|_| {
            StorageError::Serialization(format!("invalid layout value {} in checkpoint", value))
        })
    };

    Ok(Some(TraversalLayout {
        non_sitting_days: to_u32(non_sitting_days)?,
        window_budget: to_u32(window_budget)?,
        page_size: to_u32(page_size)?,
        batch_size: to_index(batch_size)?,
    }))
}

fn to_index(value: i64) -> StorageResult<usize> {
    usize::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative index {} in checkpoint", value)))
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Checkpoints must be durable once save returns
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            state_key: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            config_hash: row.get(4)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                .unwrap_or(RunStatus::Interrupted),
        })
    }
}

impl CheckpointStore for SqliteStorage {
    fn load_shard_state(&self, key: &CheckpointKey) -> StorageResult<Option<ShardState>> {
        let row = self
            .conn
            .query_row(
                "SELECT state_code, shard_id, shard_count, current_year_index, current_window_index,
                 current_page_index, current_batch_index, completed, year_counts, last_updated,
                 non_sitting_days, window_budget, page_size, batch_size
                 FROM shard_states WHERE state_key = ?1",
                params![key.to_string()],
                |row| {
                    Ok(ShardRow {
                        state_code: row.get(0)?,
                        shard_id: row.get(1)?,
                        shard_count: row.get(2)?,
                        layout: [row.get(10)?, row.get(11)?, row.get(12)?, row.get(13)?],
                        year_index: row.get(3)?,
                        window_index: row.get(4)?,
                        page_index: row.get(5)?,
                        batch_index: row.get(6)?,
                        completed: row.get::<_, i64>(7)? != 0,
                        year_counts: row.get(8)?,
                        last_updated: row.get(9)?,
                    })
                },
            )
            .optional()?;

        row.map(ShardRow::into_state).transpose()
    }

    fn save_shard_state(&mut self, state: &ShardState) -> StorageResult<()> {
        let year_counts = encode_year_counts(&state.year_counts)?;
        let layout = state.layout.as_ref();

        self.conn.execute(
            "INSERT OR REPLACE INTO shard_states
             (state_key, state_code, shard_id, shard_count, current_year_index, current_window_index,
              current_page_index, current_batch_index, completed, year_counts, last_updated,
              non_sitting_days, window_budget, page_size, batch_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                state.key().to_string(),
                state.state_code,
                state.shard_id as i64,
                state.shard_count as i64,
                state.current_year_index as i64,
                state.current_window_index as i64,
                state.current_page_index as i64,
                state.current_batch_index as i64,
                state.completed as i64,
                year_counts,
                state.last_updated.to_rfc3339(),
                layout.map(|l| i64::from(l.non_sitting_days)),
                layout.map(|l| i64::from(l.window_budget)),
                layout.map(|l| i64::from(l.page_size)),
                layout.map(|l| l.batch_size as i64),
            ],
        )?;

        Ok(())
    }

    fn delete_shard_state(&mut self, key: &CheckpointKey) -> StorageResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM shard_states WHERE state_key = ?1",
            params![key.to_string()],
        )?;
        Ok(deleted > 0)
    }
}

impl RunLog for SqliteStorage {
    fn create_run(&mut self, state_key: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (state_key, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![state_key, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, state_key, started_at, finished_at, config_hash, status
                 FROM runs WHERE id = ?1",
                params![run_id],
                Self::map_run,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn recent_runs(&self, state_key: &str, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, state_key, started_at, finished_at, config_hash, status
             FROM runs WHERE state_key = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let runs = stmt
            .query_map(params![state_key, limit as i64], Self::map_run)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}

impl RecordStore for SqliteStorage {
    fn insert_record(&self, record: &ResultRecord) -> StorageResult<InsertOutcome> {
        if record.natural_key.trim().is_empty() {
            return Err(StorageError::InvalidRecord(
                "record has an empty natural key".to_string(),
            ));
        }

        let body = serde_json::to_string(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM records WHERE natural_key = ?1",
                params![record.natural_key],
                |row| row.get(0),
            )
            .optional()?;

        // A failure marker may be superseded by anything, a record without its
        // artifact only by a complete one; complete records are kept as is.
        let changed = self.conn.execute(
            "INSERT INTO records (natural_key, court, status, artifact_url, message, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(natural_key) DO UPDATE SET
                court = excluded.court,
                status = excluded.status,
                artifact_url = excluded.artifact_url,
                message = excluded.message,
                body = excluded.body,
                stored_at = excluded.stored_at
             WHERE records.status = 'failed'
                OR (records.status = 'missing_artifact' AND excluded.status = 'complete')",
            params![
                record.natural_key,
                record.court,
                record.outcome.status(),
                record.artifact_url,
                record.outcome.message(),
                body,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(match (existing, changed) {
            (None, _) => InsertOutcome::Inserted,
            (Some(_), 0) => InsertOutcome::Duplicate,
            (Some(_), _) => InsertOutcome::Replaced,
        })
    }

    fn count_records_by_status(&self) -> StorageResult<BTreeMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM records GROUP BY status")?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(counts)
    }

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
