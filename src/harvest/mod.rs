//! Harvest module - traversal and per-row processing
//!
//! # Components
//!
//! - `TraversalEngine`: the checkpointed YEAR → WINDOW → PAGE → BATCH walk
//! - `BatchProcessor`: isolated per-row handling and bulk storage of a batch
//! - `JudgmentHandler`: parse a row, download its artifact, store it
//! - `parse_judgment_row`: field extraction from a search-result row

mod batch;
mod engine;
mod item;
mod parser;

pub use batch::{BatchProcessor, BatchReport, ItemError, ItemHandler};
pub use engine::{EngineSettings, RunSummary, TraversalEngine};
pub use item::JudgmentHandler;
pub use parser::{normalize_text, parse_judgment_row, ParsedRow};
