//! Workload partitioning
//!
//! Two static planners decide how much work a shard owns and how that work is
//! cut into requests:
//!
//! - [`split_years`] divides a year→count histogram across N shards
//! - [`WindowPlanner`] divides one year into date windows sized so that each
//!   window is expected to hold roughly the same number of results

mod shard;
mod window;

pub use shard::split_years;
pub use window::{DateWindow, WindowLength, WindowPlanner};

use crate::ConfigError;
use std::collections::BTreeMap;

/// Estimated record volume per year, ordered by year
pub type YearCounts = BTreeMap<i32, u64>;

/// Identifies which slice of the partition a process consumes
///
/// `index` is 1-based, matching the shard numbers operators pass on the
/// command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub count: usize,
    pub index: usize,
}

impl ShardSpec {
    /// Validates shard parameters before any state or network is touched
    pub fn new(count: usize, index: usize) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::Validation(
                "shard count must be >= 1".to_string(),
            ));
        }

        if index == 0 || index > count {
            return Err(ConfigError::Validation(format!(
                "shard index must be between 1 and {}, got {}",
                count, index
            )));
        }

        Ok(Self { count, index })
    }

    /// Picks this shard's map out of a full partition
    pub fn select(&self, mut parts: Vec<YearCounts>) -> YearCounts {
        if parts.len() < self.index {
            return YearCounts::new();
        }
        parts.swap_remove(self.index - 1)
    }
}
