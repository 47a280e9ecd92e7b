//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The resulting [`Config`] is built once at startup and passed by reference to
//! every component that needs it.
//!
//! # Example
//!
//! ```no_run
//! use judgments_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting court: {}", config.portal.court_name);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffStrategy, Config, OutputConfig, PacingConfig, PlannerConfig, PortalConfig,
    RetryConfig, SessionConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
