//! Shard status reporting
//!
//! This module gathers a shard's checkpoint, stored record counts and run
//! history from the storage layer and prints them for the `--status`,
//! `--dry-run` and end-of-run outputs.

use crate::checkpoint::{CheckpointKey, ShardState};
use crate::harvest::RunSummary;
use crate::partition::WindowPlanner;
use crate::storage::{CheckpointStore, RecordStore, RunLog, RunRecord, StorageResult};
use std::collections::BTreeMap;

/// Planned work for one year of a shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearPlan {
    pub year: i32,
    pub estimated_records: u64,
    pub windows: usize,
}

/// Everything known about one shard
#[derive(Debug, Clone)]
pub struct ShardStatus {
    pub key: CheckpointKey,
    /// None when the shard has never run
    pub checkpoint: Option<ShardState>,
    /// Years in traversal order
    pub plan: Vec<YearPlan>,
    pub records_by_status: BTreeMap<String, u64>,
    pub total_records: u64,
    pub recent_runs: Vec<RunRecord>,
}

/// Per-year window counts for a checkpoint, newest year first
pub fn plan_years(state: &ShardState, planner: &WindowPlanner) -> Vec<YearPlan> {
    state
        .traversal_years()
        .into_iter()
        .map(|(year, count)| YearPlan {
            year,
            estimated_records: count,
            windows: planner.plan(year, count).len(),
        })
        .collect()
}

/// Loads a shard's status from storage
pub fn load_status<S>(
    storage: &S,
    key: &CheckpointKey,
    planner: &WindowPlanner,
    run_limit: usize,
) -> StorageResult<ShardStatus>
where
    S: CheckpointStore + RecordStore + RunLog,
{
    let checkpoint = storage.load_shard_state(key)?;
    let plan = checkpoint
        .as_ref()
        .map(|state| plan_years(state, planner))
        .unwrap_or_default();

    Ok(ShardStatus {
        key: key.clone(),
        checkpoint,
        plan,
        records_by_status: storage.count_records_by_status()?,
        total_records: storage.count_records()?,
        recent_runs: storage.recent_runs(&key.to_string(), run_limit)?,
    })
}

/// Prints a shard's status to stdout
pub fn print_status(status: &ShardStatus) {
    println!("=== Shard {} ===\n", status.key);

    match &status.checkpoint {
        None => println!("Checkpoint: none (shard has not run yet)"),
        Some(state) => {
            println!("Checkpoint:");
            println!("  Shard count: {}", state.shard_count);
            println!("  Position: {}", state.position());
            println!("  Completed: {}", state.completed);
            println!("  Last updated: {}", state.last_updated.to_rfc3339());
        }
    }
    println!();

    print_plan(&status.plan, status.checkpoint.as_ref().map(|s| s.current_year_index));

    println!("Records ({} total):", status.total_records);
    if status.records_by_status.is_empty() {
        println!("  (none)");
    }
    for (outcome, count) in &status.records_by_status {
        let percentage = if status.total_records > 0 {
            (*count as f64 / status.total_records as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", outcome, count, percentage);
    }
    println!();

    if !status.recent_runs.is_empty() {
        println!("Recent Runs:");
        for run in &status.recent_runs {
            println!(
                "  #{} {} started {} finished {}",
                run.id,
                run.status.to_db_string(),
                run.started_at,
                run.finished_at.as_deref().unwrap_or("-")
            );
        }
    }
}

/// Prints per-year plans, marking the year at `current` if given
pub fn print_plan(plan: &[YearPlan], current: Option<usize>) {
    if plan.is_empty() {
        println!("Years: not assigned yet\n");
        return;
    }

    println!("Years ({}):", plan.len());
    for (index, year) in plan.iter().enumerate() {
        let marker = if current == Some(index) { "*" } else { " " };
        println!(
            " {} {}: {} estimated records in {} windows",
            marker, year.year, year.estimated_records, year.windows
        );
    }
    println!();
}

/// Prints the counters of a finished run
pub fn print_run_summary(summary: &RunSummary) {
    if summary.already_completed {
        println!("Shard was already completed; nothing to do.");
        return;
    }

    println!("=== Run Summary ===\n");
    println!("  Years visited: {}", summary.years_visited);
    println!(
        "  Windows: {} visited, {} skipped",
        summary.windows_visited, summary.windows_skipped
    );
    println!(
        "  Pages: {} fetched, {} skipped",
        summary.pages_fetched, summary.pages_skipped
    );
    println!("  Batches processed: {}", summary.batches_processed);
    println!(
        "  Records: {} stored, {} duplicate, {} rejected, {} failed",
        summary.records_stored,
        summary.records_duplicate,
        summary.records_rejected,
        summary.records_failed
    );
}
