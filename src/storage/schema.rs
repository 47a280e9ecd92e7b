//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvester database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One checkpoint per shard key
CREATE TABLE IF NOT EXISTS shard_states (
    state_key TEXT PRIMARY KEY,
    state_code TEXT NOT NULL,
    shard_id INTEGER NOT NULL,
    shard_count INTEGER NOT NULL,
    non_sitting_days INTEGER,
    window_budget INTEGER,
    page_size INTEGER,
    batch_size INTEGER,
    current_year_index INTEGER NOT NULL DEFAULT 0,
    current_window_index INTEGER NOT NULL DEFAULT 0,
    current_page_index INTEGER NOT NULL DEFAULT 0,
    current_batch_index INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    year_counts TEXT NOT NULL,
    last_updated TEXT NOT NULL
);

-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    state_key TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_state_key ON runs(state_key);

-- Harvested records, deduplicated by natural key
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    natural_key TEXT NOT NULL UNIQUE,
    court TEXT NOT NULL,
    status TEXT NOT NULL,
    artifact_url TEXT,
    message TEXT,
    body TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
