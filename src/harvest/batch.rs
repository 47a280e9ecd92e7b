//! Batch processing
//!
//! A batch is a bounded slice of one page's rows. Every row is handled
//! independently: a failing row becomes a failure record in its own slot and
//! never disturbs its neighbours.

use crate::sink::{InsertReport, ResultRecord, Sink, SinkError};
use crate::source::{RawRecord, SourceError};
use crate::HarvestError;
use async_trait::async_trait;
use thiserror::Error;

/// Progress is logged every this many items
const PROGRESS_INTERVAL: usize = 10;

/// Errors from handling a single row
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ItemError {
    /// Fatal item errors end the run instead of becoming failure records
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_fatal())
    }
}

/// Turns one portal row into a result record
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: &RawRecord) -> Result<ResultRecord, ItemError>;

    /// Natural key used for the failure marker of `item`
    fn natural_key(&self, item: &RawRecord) -> String {
        ResultRecord::natural_key_for(None, &item.html)
    }
}

/// Summary of one processed and stored batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub insert: InsertReport,
}

pub struct BatchProcessor {
    court: String,
}

impl BatchProcessor {
    pub fn new(court: impl Into<String>) -> Self {
        Self {
            court: court.into(),
        }
    }

    /// Handles every item of `batch`, returning one record per item in order
    ///
    /// Item errors become `Failed` records; only fatal errors abort the batch.
    pub async fn process<H: ItemHandler + ?Sized>(
        &self,
        batch: &[RawRecord],
        handler: &H,
    ) -> Result<Vec<ResultRecord>, ItemError> {
        let total = batch.len();
        let mut results = Vec::with_capacity(total);

        for (i, item) in batch.iter().enumerate() {
            let record = match handler.handle(item).await {
                Ok(record) => record,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!("Error processing row {}: {}", item.row, e);
                    ResultRecord::failed(handler.natural_key(item), &self.court, e.to_string())
                }
            };
            results.push(record);

            let done = i + 1;
            if done % PROGRESS_INTERVAL == 0 || done == total {
                tracing::info!("Progress: {}/{} items processed", done, total);
            }
        }

        Ok(results)
    }

    /// Processes `batch` and hands the results to the sink in one bulk write
    ///
    /// Rejected records are logged, not retried; reprocessing the batch is
    /// idempotent thanks to natural-key deduplication.
    pub async fn process_and_store<H, K>(
        &self,
        batch: &[RawRecord],
        handler: &H,
        sink: &K,
    ) -> Result<BatchReport, HarvestError>
    where
        H: ItemHandler + ?Sized,
        K: Sink + ?Sized,
    {
        let records = self.process(batch, handler).await?;
        let failed = records.iter().filter(|r| r.outcome.is_failed()).count();

        let insert = sink.insert_records(&records)?;
        if !insert.rejected.is_empty() {
            tracing::warn!(
                "{} of {} records rejected by the sink: {}",
                insert.rejected.len(),
                records.len(),
                insert.rejected.join("; ")
            );
        }
        tracing::info!(
            "Stored batch: {} written, {} duplicates, {} failed items",
            insert.written(),
            insert.duplicates,
            failed
        );

        Ok(BatchReport {
            processed: records.len(),
            failed,
            insert,
        })
    }
}
