//! Traversal engine - the checkpointed YEAR → WINDOW → PAGE → BATCH walk
//!
//! The engine owns the shard's checkpoint tracker and advances it before
//! doing the work of each level, so an interrupted run resumes at the unit
//! that was in flight. The resume position is captured once at the start of
//! [`TraversalEngine::run`]; a level resumes its saved index only while the
//! walk is still on the captured path, and starts from zero otherwise.

use crate::checkpoint::{Position, Tracker, TraversalLayout};
use crate::config::Config;
use crate::harvest::batch::BatchProcessor;
use crate::harvest::item::JudgmentHandler;
use crate::partition::{split_years, DateWindow, ShardSpec, WindowPlanner};
use crate::sink::Sink;
use crate::source::{RawRecord, SearchQuery, SourceClient};
use crate::storage::CheckpointStore;
use crate::HarvestError;
use std::time::Duration;

/// Traversal parameters
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub page_size: u32,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub window_delay: Duration,
    pub planner: WindowPlanner,
    pub court: String,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.portal.page_size,
            batch_size: config.portal.batch_size,
            inter_batch_delay: config.pacing.inter_batch_delay(),
            window_delay: config.pacing.window_delay(),
            planner: WindowPlanner::from_config(&config.planner),
            court: config.portal.court_name.replace('_', " ").to_lowercase(),
        }
    }

    /// The layout a checkpoint taken under these settings is valid for
    pub fn layout(&self) -> TraversalLayout {
        TraversalLayout {
            non_sitting_days: self.planner.non_sitting_days(),
            window_budget: self.planner.window_budget(),
            page_size: self.page_size.max(1),
            batch_size: self.batch_size.max(1),
        }
    }
}

/// Number of pages needed to list `total_records` at `page_size` per page
fn page_count(total_records: u64, page_size: u32) -> usize {
    let pages = total_records.div_ceil(u64::from(page_size.max(1)));
    usize::try_from(pages).unwrap_or(usize::MAX)
}

/// Counters for one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// The shard was already complete when the run started
    pub already_completed: bool,
    pub years_visited: usize,
    pub windows_visited: usize,
    pub windows_skipped: usize,
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    pub batches_processed: usize,
    pub records_stored: usize,
    pub records_duplicate: usize,
    pub records_rejected: usize,
    pub records_failed: usize,
}

/// Walks one shard's years, windows, pages and batches
pub struct TraversalEngine<S, K, C>
where
    S: SourceClient,
    K: Sink,
    C: CheckpointStore,
{
    source: S,
    sink: K,
    tracker: Tracker<C>,
    shard: ShardSpec,
    settings: EngineSettings,
    processor: BatchProcessor,
    summary: RunSummary,
}

impl<S, K, C> TraversalEngine<S, K, C>
where
    S: SourceClient,
    K: Sink,
    C: CheckpointStore,
{
    pub fn new(
        source: S,
        sink: K,
        tracker: Tracker<C>,
        shard: ShardSpec,
        settings: EngineSettings,
    ) -> Self {
        let processor = BatchProcessor::new(settings.court.clone());
        Self {
            source,
            sink,
            tracker,
            shard,
            settings,
            processor,
            summary: RunSummary::default(),
        }
    }

    pub fn tracker(&self) -> &Tracker<C> {
        &self.tracker
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Runs the shard to completion or to the first fatal error
    ///
    /// Checkpoint state stays valid on error; re-running resumes from it.
    pub async fn run(&mut self) -> Result<RunSummary, HarvestError> {
        self.summary = RunSummary::default();

        if self.tracker.is_completed() {
            tracing::info!("Shard {} is already completed", self.tracker.state().key());
            self.summary.already_completed = true;
            return Ok(self.summary.clone());
        }

        if self.tracker.state().year_counts.is_empty() && !self.assign_years().await? {
            return Ok(self.summary.clone());
        }

        let resume = self.tracker.position();
        let years = self.tracker.state().traversal_years();
        tracing::info!(
            "Processing {} years {:?} starting at {}",
            years.len(),
            years.iter().map(|(year, _)| *year).collect::<Vec<_>>(),
            resume
        );

        for (year_index, &(year, count)) in years.iter().enumerate().skip(resume.year) {
            let resume_year = year_index == resume.year;
            self.tracker.enter_year(year_index, resume_year)?;
            self.summary.years_visited += 1;

            tracing::info!(
                "Processing year {} with {} records (index {})",
                year,
                count,
                year_index
            );
            self.run_year(year, count, resume, resume_year).await?;

            self.tracker.finish_year()?;
            tracing::info!("Finished year {}", year);
        }

        self.tracker.mark_completed()?;
        tracing::info!("Shard {} completed", self.tracker.state().key());

        Ok(self.summary.clone())
    }

    /// Fetches the histogram and stores this shard's slice
    ///
    /// Returns false when the slice is empty and the shard was marked
    /// completed.
    async fn assign_years(&mut self) -> Result<bool, HarvestError> {
        tracing::info!("Fetching year histogram");
        let histogram = self.source.fetch_year_histogram().await?;
        tracing::info!("Portal reports {} years", histogram.len());

        let parts = split_years(&histogram, self.shard.count)?;
        let slice = self.shard.select(parts);

        if slice.is_empty() {
            tracing::info!(
                "Shard {}/{} has no years assigned; marking completed",
                self.shard.index,
                self.shard.count
            );
            self.tracker.mark_completed()?;
            return Ok(false);
        }

        tracing::info!(
            "Shard {}/{} assigned years: {:?}",
            self.shard.index,
            self.shard.count,
            slice
        );
        self.tracker.assign_year_counts(slice)?;
        Ok(true)
    }

    async fn run_year(
        &mut self,
        year: i32,
        count: u64,
        resume: Position,
        resume_year: bool,
    ) -> Result<(), HarvestError> {
        let windows = self.settings.planner.plan(year, count);
        tracing::info!("Generated {} windows for year {}", windows.len(), year);

        let start = if resume_year { resume.window } else { 0 };
        for (window_index, &window) in windows.iter().enumerate().skip(start) {
            let resume_window = resume_year && window_index == resume.window;
            self.tracker.enter_window(window_index, resume_window)?;

            self.run_window(window, resume, resume_window).await?;

            if !self.settings.window_delay.is_zero() {
                tokio::time::sleep(self.settings.window_delay).await;
            }
        }

        Ok(())
    }

    async fn run_window(
        &mut self,
        window: DateWindow,
        resume: Position,
        resume_window: bool,
    ) -> Result<(), HarvestError> {
        self.summary.windows_visited += 1;
        let page_size = self.settings.page_size.max(1);
        tracing::info!("Processing window {}", window);

        let probe = match self.source.search(&SearchQuery::probe(window, page_size)).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                tracing::warn!("No search results returned for window {}", window);
                self.summary.windows_skipped += 1;
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Probe failed for window {}: {}; skipping window", window, e);
                self.summary.windows_skipped += 1;
                return Ok(());
            }
        };

        let total_pages = page_count(probe.total_records, page_size);
        tracing::info!(
            "Window {}: {} records, {} pages",
            window,
            probe.total_records,
            total_pages
        );

        let start = if resume_window { resume.page } else { 0 };
        for page_index in start..total_pages {
            let resume_page = resume_window && page_index == resume.page;
            self.tracker.enter_page(page_index, resume_page)?;

            tracing::info!("Processing page {}/{}", page_index + 1, total_pages);
            let query = SearchQuery::page(window, page_index, page_size);
            let page = match self.source.search(&query).await {
                Ok(Some(page)) if !page.items.is_empty() => page,
                Ok(_) => {
                    tracing::warn!("No results for page starting at {}", query.offset);
                    self.summary.pages_skipped += 1;
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        "Fetching page starting at {} failed: {}; skipping page",
                        query.offset,
                        e
                    );
                    self.summary.pages_skipped += 1;
                    continue;
                }
            };

            self.summary.pages_fetched += 1;
            tracing::info!(
                "Retrieved {} results starting at index {}",
                page.items.len(),
                query.offset
            );
            self.run_page(&page.items, resume, resume_page).await?;
        }

        tracing::info!("Processed window {}", window);
        Ok(())
    }

    async fn run_page(
        &mut self,
        items: &[RawRecord],
        resume: Position,
        resume_page: bool,
    ) -> Result<(), HarvestError> {
        let batches: Vec<&[RawRecord]> = items.chunks(self.settings.batch_size.max(1)).collect();
        let start = if resume_page { resume.batch } else { 0 };

        for (batch_index, batch) in batches.iter().enumerate().skip(start) {
            self.tracker.enter_batch(batch_index)?;
            tracing::info!(
                "Processing batch {}/{} ({} items)",
                batch_index + 1,
                batches.len(),
                batch.len()
            );

            let handler = JudgmentHandler::new(&self.source, &self.sink, &self.settings.court);
            let report = self
                .processor
                .process_and_store(batch, &handler, &self.sink)
                .await?;

            self.summary.batches_processed += 1;
            self.summary.records_stored += report.insert.written();
            self.summary.records_duplicate += report.insert.duplicates;
            self.summary.records_rejected += report.insert.rejected.len();
            self.summary.records_failed += report.failed;

            if !self.settings.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
        }

        Ok(())
    }
}
