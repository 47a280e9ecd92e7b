//! Output module for reporting harvest progress
//!
//! This module handles:
//! - Printing a shard's checkpoint, records and run history (`--status`)
//! - Printing the per-year window plan (`--dry-run`)
//! - Printing the counters of a finished run

pub mod status;

pub use status::{
    load_status, plan_years, print_plan, print_run_summary, print_status, ShardStatus, YearPlan,
};
