//! Retry and backoff for source calls
//!
//! Transient failures are retried with a fixed schedule; everything else is
//! returned to the caller on the first attempt.

use crate::config::{BackoffStrategy, RetryConfig};
use crate::partition::YearCounts;
use crate::source::{SearchPage, SearchQuery, SourceClient, SourceResult};
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * (attempt + 1)`
    Linear { base: Duration },
    /// Uniformly random in `[min, max]`
    Jittered { min: Duration, max: Duration },
}

/// Bounded retry of transient source errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear {
                base: Duration::from_secs(2),
            },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = match config.strategy {
            BackoffStrategy::Linear => Backoff::Linear {
                base: Duration::from_millis(config.base_delay_ms),
            },
            BackoffStrategy::Jittered => Backoff::Jittered {
                min: Duration::from_millis(config.jitter_min_ms),
                max: Duration::from_millis(config.jitter_max_ms),
            },
        };
        Self::new(config.max_attempts, backoff)
    }

    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear { base } => base.saturating_mul(attempt.saturating_add(1)),
            Backoff::Jittered { min, max } => {
                let low = min.as_millis() as u64;
                let high = (max.as_millis() as u64).max(low);
                Duration::from_millis(fastrand::u64(low..=high))
            }
        }
    }

    /// Runs `f` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent
    ///
    /// The last error is returned when attempts run out.
    pub async fn retry<T, F, Fut>(&self, op: &str, mut f: F) -> SourceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        op,
                        attempt + 1,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("{} gave up after {} attempts: {}", op, max_attempts, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Wraps a source client so every call goes through a [`RetryPolicy`]
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: SourceClient> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<S: SourceClient> SourceClient for RetryingSource<S> {
    async fn search(&self, query: &SearchQuery) -> SourceResult<Option<SearchPage>> {
        let inner = &self.inner;
        self.policy.retry("search", move || inner.search(query)).await
    }

    async fn download(&self, artifact_ref: &str) -> SourceResult<Option<PathBuf>> {
        let inner = &self.inner;
        self.policy
            .retry("download", move || inner.download(artifact_ref))
            .await
    }

    async fn fetch_year_histogram(&self) -> SourceResult<YearCounts> {
        let inner = &self.inner;
        self.policy
            .retry("year histogram", move || inner.fetch_year_histogram())
            .await
    }
}
