use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    pub output: OutputConfig,
}

/// Portal endpoint and traversal sizing
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    /// Base URL of the judgment search portal
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Court/state identifier sent with every search; part of the checkpoint key
    #[serde(rename = "state-code")]
    pub state_code: String,

    /// Human readable court name stored with each record
    #[serde(rename = "court-name")]
    pub court_name: String,

    /// Rows requested per search page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Rows handed to the batch processor at once
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// User-Agent header sent to the portal
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Session verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// External program that reads a CAPTCHA image on stdin and prints its text
    #[serde(rename = "captcha-command")]
    pub captcha_command: String,

    /// Extra arguments for the CAPTCHA program
    #[serde(rename = "captcha-args", default)]
    pub captcha_args: Vec<String>,

    /// Verification attempts before the session is declared failed
    #[serde(
        rename = "max-verification-attempts",
        default = "default_verification_attempts"
    )]
    pub max_verification_attempts: u32,
}

/// Backoff strategy between retries of transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    Jittered,
}

/// Retry settings for source calls
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call (first try included)
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    pub strategy: BackoffStrategy,

    /// Linear backoff base (milliseconds)
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Jittered backoff lower bound (milliseconds)
    #[serde(rename = "jitter-min-ms")]
    pub jitter_min_ms: u64,

    /// Jittered backoff upper bound (milliseconds)
    #[serde(rename = "jitter-max-ms")]
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Linear,
            base_delay_ms: 2000,
            jitter_min_ms: 1000,
            jitter_max_ms: 3000,
        }
    }
}

/// Courtesy delays between units of work
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    #[serde(rename = "inter-batch-delay-ms")]
    pub inter_batch_delay_ms: u64,

    #[serde(rename = "window-delay-ms")]
    pub window_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_batch_delay_ms: 1000,
            window_delay_ms: 1000,
        }
    }
}

impl PacingConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn window_delay(&self) -> Duration {
        Duration::from_millis(self.window_delay_ms)
    }
}

/// Date window sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Days per year on which the court does not sit
    #[serde(rename = "non-sitting-days")]
    pub non_sitting_days: u32,

    /// Expected results per window
    #[serde(rename = "window-budget")]
    pub window_budget: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            non_sitting_days: 96,
            window_budget: 200,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database holding checkpoints, runs and records
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Scratch directory for downloaded artifacts
    #[serde(rename = "download-dir", default = "default_download_dir")]
    pub download_dir: String,

    /// Directory artifacts are moved into once stored
    #[serde(rename = "artifact-dir")]
    pub artifact_dir: String,

    /// Public URL prefix for stored artifacts
    #[serde(rename = "artifact-base-url", default)]
    pub artifact_base_url: Option<String>,
}

fn default_page_size() -> u32 {
    100
}

fn default_batch_size() -> usize {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_verification_attempts() -> u32 {
    5
}

fn default_download_dir() -> String {
    "./judgments".to_string()
}
