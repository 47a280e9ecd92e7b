//! Checkpoint module for tracking shard traversal progress
//!
//! # Components
//!
//! - `ShardState`: the persisted position of one shard (year, window, page, batch)
//! - `TraversalLayout`: the window/page/batch parameters a position is valid under
//! - `CheckpointKey`: deterministic key derived from state code and shard id
//! - `Tracker`: the only writer of `ShardState`, flushing after every advance

mod state;
mod tracker;

// Re-export main types
pub use state::{
    decode_year_counts, encode_year_counts, CheckpointKey, Position, ShardState,
    TraversalLayout,
};
pub use tracker::Tracker;
