//! Source client module
//!
//! This module abstracts the external judgment portal:
//! - `SourceClient`: paginated search, artifact download, year histogram
//! - `PortalClient`: the reqwest implementation with session verification
//! - `RetryingSource`: middleware applying a `RetryPolicy` to every call
//! - `CaptchaSolver`: pluggable verification-challenge solver

mod captcha;
mod http;
mod retry;

pub use captcha::{solve_expression, CaptchaSolver, CommandSolver};
pub use http::{build_http_client, PortalClient, PortalSettings};
pub use retry::{Backoff, RetryPolicy, RetryingSource};

use crate::partition::{DateWindow, YearCounts};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a source client
#[derive(Debug, Error)]
pub enum SourceError {
    /// Timeouts, dropped connections and similar recoverable failures
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Session verification was exhausted; the run cannot continue
    #[error("Verification failed: {0}")]
    Verification(String),

    /// The portal answered with something we could not interpret
    #[error("Portal error: {0}")]
    Portal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Whether the run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Verification(_))
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// One paginated search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// None searches the whole portal without a date filter
    pub window: Option<DateWindow>,
    pub offset: u64,
    pub page_size: u32,
}

impl SearchQuery {
    /// Query for page `page_index` of `window`
    pub fn page(window: DateWindow, page_index: usize, page_size: u32) -> Self {
        Self {
            window: Some(window),
            offset: page_index as u64 * page_size as u64,
            page_size,
        }
    }

    /// Offset-zero query used to learn a window's total
    pub fn probe(window: DateWindow, page_size: u32) -> Self {
        Self::page(window, 0, page_size)
    }
}

/// One row returned by the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// HTML fragment describing the judgment
    pub html: String,
    /// Absolute row position within the search result
    pub row: u64,
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub total_records: u64,
    pub items: Vec<RawRecord>,
}

/// Capability for talking to the portal
///
/// Implementations own session handling; callers see only queries and
/// results.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Runs one search; None means the portal returned no result set
    async fn search(&self, query: &SearchQuery) -> SourceResult<Option<SearchPage>>;

    /// Downloads the artifact behind `artifact_ref`; None when the portal
    /// has no file for it
    async fn download(&self, artifact_ref: &str) -> SourceResult<Option<PathBuf>>;

    /// Estimated number of records per year
    async fn fetch_year_histogram(&self) -> SourceResult<YearCounts>;
}

#[async_trait]
impl<S: SourceClient + ?Sized> SourceClient for std::sync::Arc<S> {
    async fn search(&self, query: &SearchQuery) -> SourceResult<Option<SearchPage>> {
        (**self).search(query).await
    }

    async fn download(&self, artifact_ref: &str) -> SourceResult<Option<PathBuf>> {
        (**self).download(artifact_ref).await
    }

    async fn fetch_year_histogram(&self) -> SourceResult<YearCounts> {
        (**self).fetch_year_histogram().await
    }
}
