/// Shard checkpoint definitions
///
/// This module defines the persisted traversal position of one shard.
use crate::partition::YearCounts;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one shard's checkpoint
///
/// Re-invoking the harvester with the same state code and shard id resumes
/// the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub state_code: String,
    pub shard_id: usize,
}

impl CheckpointKey {
    pub fn new(state_code: impl Into<String>, shard_id: usize) -> Self {
        Self {
            state_code: state_code.into(),
            shard_id,
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.state_code, self.shard_id)
    }
}

/// A point in the YEAR → WINDOW → PAGE → BATCH traversal
///
/// Positions order lexicographically, which is also traversal order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub year: usize,
    pub window: usize,
    pub page: usize,
    pub batch: usize,
}

impl Position {
    pub fn new(year: usize, window: usize, page: usize, batch: usize) -> Self {
        Self {
            year,
            window,
            page,
            batch,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "year#{} window#{} page#{} batch#{}",
            self.year, self.window, self.page, self.batch
        )
    }
}

/// Parameters that decide how a shard's years are cut into windows, pages
/// and batches
///
/// Saved indices are only meaningful under the layout they were recorded
/// with, so a checkpoint keeps the layout alongside its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalLayout {
    pub non_sitting_days: u32,
    pub window_budget: u32,
    pub page_size: u32,
    pub batch_size: usize,
}

impl fmt::Display for TraversalLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "non-sitting-days={} window-budget={} page-size={} batch-size={}",
            self.non_sitting_days, self.window_budget, self.page_size, self.batch_size
        )
    }
}

/// Persisted traversal state of one shard
///
/// Only the checkpoint tracker mutates this; every mutation is flushed to the
/// store before the traversal moves on.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardState {
    pub state_code: String,
    pub shard_id: usize,
    /// Shard count the year map was partitioned for
    pub shard_count: usize,
    /// Layout the indices below were recorded under; None only for
    /// checkpoints that predate layout tracking
    pub layout: Option<TraversalLayout>,
    pub current_year_index: usize,
    pub current_window_index: usize,
    pub current_page_index: usize,
    pub current_batch_index: usize,
    /// Terminal: no progress is made once set
    pub completed: bool,
    /// This shard's slice of the year histogram
    pub year_counts: YearCounts,
    pub last_updated: DateTime<Utc>,
}

impl ShardState {
    /// A fresh state with every index at zero and no assigned years
    pub fn new(key: &CheckpointKey, shard_count: usize) -> Self {
        Self {
            state_code: key.state_code.clone(),
            shard_id: key.shard_id,
            shard_count,
            layout: None,
            current_year_index: 0,
            current_window_index: 0,
            current_page_index: 0,
            current_batch_index: 0,
            completed: false,
            year_counts: YearCounts::new(),
            last_updated: Utc::now(),
        }
    }

    /// A fresh state that records the layout its indices will use
    pub fn with_layout(key: &CheckpointKey, shard_count: usize, layout: TraversalLayout) -> Self {
        Self {
            layout: Some(layout),
            ..Self::new(key, shard_count)
        }
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey::new(self.state_code.clone(), self.shard_id)
    }

    pub fn position(&self) -> Position {
        Position::new(
            self.current_year_index,
            self.current_window_index,
            self.current_page_index,
            self.current_batch_index,
        )
    }

    /// Years in traversal order (newest first) with their estimated counts
    pub fn traversal_years(&self) -> Vec<(i32, u64)> {
        self.year_counts
            .iter()
            .rev()
            .map(|(&year, &count)| (year, count))
            .collect()
    }
}

/// Encodes a year map as a JSON object of strings, e.g. `{"2020":"75"}`
pub fn encode_year_counts(counts: &YearCounts) -> Result<String, StorageError> {
    let wire: BTreeMap<String, String> = counts
        .iter()
        .map(|(year, count)| (year.to_string(), count.to_string()))
        .collect();
    serde_json::to_string(&wire).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Decodes a year map written by [`encode_year_counts`]
pub fn decode_year_counts(raw: &str) -> Result<YearCounts, StorageError> {
    let wire: BTreeMap<String, String> =
        serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))?;

    wire.into_iter()
        .map(|(year, count)| {
            let year = year.trim().parse::<i32>().map_err(|_| {
                StorageError::Serialization(format!("invalid year '{}' in year map", year))
            })?;
            let count = count.trim().parse::<u64>().map_err(|_| {
                StorageError::Serialization(format!("invalid count '{}' for year {}", count, year))
            })?;
            Ok((year, count))
        })
        .collect()
}
