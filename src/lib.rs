//! Judgments-Harvester: a resumable, sharded judgment portal harvester
//!
//! This crate walks a paginated, rate-limited judgment portal year by year,
//! window by window and page by page, checkpointing its position after every
//! step so an interrupted shard can resume exactly where it stopped.

pub mod checkpoint;
pub mod config;
pub mod harvest;
pub mod output;
pub mod partition;
pub mod sink;
pub mod source;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] source::SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Item error: {0}")]
    Item(#[from] harvest::ItemError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use checkpoint::{CheckpointKey, Position, ShardState, Tracker};
pub use config::Config;
pub use harvest::{RunSummary, TraversalEngine};
pub use partition::{split_years, DateWindow, ShardSpec, WindowPlanner, YearCounts};
