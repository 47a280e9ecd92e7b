//! Traversal tests against a scripted portal
//!
//! The scripted portal serves deterministic rows for every date window, so the
//! records stored by different runs (interrupted, resumed, repeated) can be
//! compared directly.

use async_trait::async_trait;
use judgments_harvester::checkpoint::{CheckpointKey, ShardState, Tracker};
use judgments_harvester::harvest::{EngineSettings, TraversalEngine};
use judgments_harvester::partition::{DateWindow, ShardSpec, WindowPlanner, YearCounts};
use judgments_harvester::sink::{ArtifactStore, DatabaseSink, ResultRecord};
use judgments_harvester::source::{
    RawRecord, SearchPage, SearchQuery, SourceClient, SourceError, SourceResult,
};
use judgments_harvester::storage::{CheckpointStore, SqliteStorage, StorageError};
use judgments_harvester::HarvestError;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const STATE_CODE: &str = "16_1";
const PAGE_SIZE: u32 = 2;
const ROWS_PER_WINDOW: u64 = 5;
/// Probe plus three pages of two, two and one rows
const SEARCHES_PER_WINDOW: usize = 4;

/// In-process portal with deterministic rows and injectable failures
struct ScriptedPortal {
    histogram: YearCounts,
    download_dir: PathBuf,
    queries: Mutex<Vec<SearchQuery>>,
    downloads: Mutex<Vec<String>>,
    /// 1-based search call that fails verification
    fatal_search: Option<usize>,
    /// 1-based download call that fails verification
    fatal_download: Option<usize>,
    /// Windows whose first search fails transiently
    failing_probes: HashSet<DateWindow>,
    /// (window, offset) pairs answered with an empty page
    empty_pages: HashSet<(DateWindow, u64)>,
    failing_downloads: HashSet<String>,
}

impl ScriptedPortal {
    fn new(histogram: YearCounts, download_dir: PathBuf) -> Self {
        Self {
            histogram,
            download_dir,
            queries: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            fatal_search: None,
            fatal_download: None,
            failing_probes: HashSet::new(),
            empty_pages: HashSet::new(),
            failing_downloads: HashSet::new(),
        }
    }

    fn with_fatal_search(mut self, call: usize) -> Self {
        self.fatal_search = Some(call);
        self
    }

    fn with_fatal_download(mut self, call: usize) -> Self {
        self.fatal_download = Some(call);
        self
    }

    fn with_failing_probe(mut self, window: DateWindow) -> Self {
        self.failing_probes.insert(window);
        self
    }

    fn with_empty_page(mut self, window: DateWindow, offset: u64) -> Self {
        self.empty_pages.insert((window, offset));
        self
    }

    fn with_failing_download(mut self, artifact_path: String) -> Self {
        self.failing_downloads.insert(artifact_path);
        self
    }

    fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }

    fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    /// (window, offset) of every page request, leaving out the total lookup
    /// that opens each window visit
    fn page_requests(&self) -> Vec<(DateWindow, u64)> {
        let mut current = None;
        let mut requests = Vec::new();
        for query in self.queries() {
            let Some(window) = query.window else {
                continue;
            };
            if current == Some(window) {
                requests.push((window, query.offset));
            } else {
                current = Some(window);
            }
        }
        requests
    }
}

fn artifact_path(window: &DateWindow, row: u64) -> String {
    format!("court/{}/{}.pdf", window.start_param(), row)
}

fn row_html(window: &DateWindow, row: u64) -> String {
    format!(
        r#"<button onclick="open_pdf('{row}','','{path}')">WP/{row}/{year} of A vs B</button>"#,
        row = row,
        path = artifact_path(window, row),
        year = window.year()
    )
}

#[async_trait]
impl SourceClient for ScriptedPortal {
    async fn search(&self, query: &SearchQuery) -> SourceResult<Option<SearchPage>> {
        let (call, first_for_window) = {
            let mut queries = self.queries.lock().unwrap();
            let first = !queries.iter().any(|q| q.window == query.window);
            queries.push(query.clone());
            (queries.len(), first)
        };

        if self.fatal_search == Some(call) {
            return Err(SourceError::Verification("session rejected".to_string()));
        }

        let Some(window) = query.window else {
            return Ok(None);
        };

        if first_for_window && self.failing_probes.contains(&window) {
            return Err(SourceError::Transient("connection reset".to_string()));
        }

        if self.empty_pages.contains(&(window, query.offset)) {
            return Ok(Some(SearchPage {
                total_records: ROWS_PER_WINDOW,
                items: Vec::new(),
            }));
        }

        let end = (query.offset + u64::from(query.page_size)).min(ROWS_PER_WINDOW);
        let items = (query.offset..end)
            .map(|row| RawRecord {
                html: row_html(&window, row),
                row,
            })
            .collect();

        Ok(Some(SearchPage {
            total_records: ROWS_PER_WINDOW,
            items,
        }))
    }

    async fn download(&self, artifact_ref: &str) -> SourceResult<Option<PathBuf>> {
        let call = {
            let mut downloads = self.downloads.lock().unwrap();
            downloads.push(artifact_ref.to_string());
            downloads.len()
        };

        if self.fatal_download == Some(call) {
            return Err(SourceError::Verification("session rejected".to_string()));
        }

        if self.failing_downloads.contains(artifact_ref) {
            return Err(SourceError::Transient(format!(
                "download of {} timed out",
                artifact_ref
            )));
        }

        let local = self.download_dir.join(artifact_ref.replace('/', "_"));
        tokio::fs::write(&local, artifact_ref.as_bytes()).await?;
        Ok(Some(local))
    }

    async fn fetch_year_histogram(&self) -> SourceResult<YearCounts> {
        Ok(self.histogram.clone())
    }
}

type Engine = TraversalEngine<Arc<ScriptedPortal>, DatabaseSink, SqliteStorage>;

/// A scratch database, download directory and artifact store
struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("downloads")).unwrap();
        Self { dir }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("harvest.db")
    }

    fn portal(&self, histogram: YearCounts) -> ScriptedPortal {
        ScriptedPortal::new(histogram, self.dir.path().join("downloads"))
    }

    fn storage(&self) -> SqliteStorage {
        SqliteStorage::new(&self.db_path()).unwrap()
    }

    fn sink(&self) -> DatabaseSink {
        let artifacts = ArtifactStore::new(self.dir.path().join("artifacts"), None);
        DatabaseSink::open(&self.db_path(), artifacts).unwrap()
    }

    fn engine(
        &self,
        portal: &Arc<ScriptedPortal>,
        shard: ShardSpec,
        planner: WindowPlanner,
    ) -> Engine {
        let settings = settings(planner);
        let key = CheckpointKey::new(STATE_CODE, shard.index);
        let (tracker, _) = Tracker::open(self.storage(), &key, &shard, settings.layout()).unwrap();
        self.engine_with(portal, tracker, shard, settings)
    }

    fn engine_with(
        &self,
        portal: &Arc<ScriptedPortal>,
        tracker: Tracker<SqliteStorage>,
        shard: ShardSpec,
        settings: EngineSettings,
    ) -> Engine {
        TraversalEngine::new(Arc::clone(portal), self.sink(), tracker, shard, settings)
    }

    fn checkpoint(&self, shard_index: usize) -> ShardState {
        self.storage()
            .load_shard_state(&CheckpointKey::new(STATE_CODE, shard_index))
            .unwrap()
            .expect("checkpoint should exist")
    }

    /// (natural key, status) of every stored record, ordered by key
    fn records(&self) -> Vec<(String, String)> {
        let conn = rusqlite::Connection::open(self.db_path()).unwrap();
        let mut stmt = conn
            .prepare("SELECT natural_key, status FROM records ORDER BY natural_key")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.collect::<Result<_, _>>().unwrap()
    }
}

fn settings(planner: WindowPlanner) -> EngineSettings {
    EngineSettings {
        page_size: PAGE_SIZE,
        batch_size: 1,
        inter_batch_delay: Duration::ZERO,
        window_delay: Duration::ZERO,
        planner,
        court: "calcutta high court".to_string(),
    }
}

/// 365 records a year with a budget of 100 gives 100-day windows
fn dense_planner() -> WindowPlanner {
    WindowPlanner::new(0, 100)
}

fn single_shard() -> ShardSpec {
    ShardSpec::new(1, 1).unwrap()
}

#[tokio::test]
async fn test_full_run_stores_every_row() {
    let harness = Harness::new();
    let portal = Arc::new(harness.portal(YearCounts::from([(2020, 365)])));
    let windows = dense_planner().plan(2020, 365).len();
    assert_eq!(windows, 4);

    let mut engine = harness.engine(&portal, single_shard(), dense_planner());
    let summary = engine.run().await.expect("harvest failed");

    assert_eq!(summary.years_visited, 1);
    assert_eq!(summary.windows_visited, windows);
    assert_eq!(summary.pages_fetched, windows * 3);
    assert_eq!(summary.batches_processed, windows * ROWS_PER_WINDOW as usize);
    assert_eq!(summary.records_stored, windows * ROWS_PER_WINDOW as usize);
    assert_eq!(summary.records_failed, 0);

    let records = harness.records();
    assert_eq!(records.len(), windows * ROWS_PER_WINDOW as usize);
    assert!(records.iter().all(|(_, status)| status == "complete"));
    assert_eq!(
        std::fs::read_dir(harness.dir.path().join("artifacts"))
            .unwrap()
            .count(),
        records.len()
    );
    assert!(harness.checkpoint(1).completed);

    // A completed shard does no further work
    let searches = portal.queries().len();
    let mut rerun = harness.engine(&portal, single_shard(), dense_planner());
    let summary = rerun.run().await.unwrap();
    assert!(summary.already_completed);
    assert_eq!(portal.queries().len(), searches);
}

#[tokio::test]
async fn test_two_shards_share_the_histogram() {
    let harness = Harness::new();
    let histogram = YearCounts::from([(2020, 100), (2021, 50)]);
    let portal = Arc::new(harness.portal(histogram));

    let second = ShardSpec::new(2, 2).unwrap();
    let mut engine = harness.engine(&portal, second, WindowPlanner::default());
    let summary = engine.run().await.unwrap();

    assert_eq!(
        harness.checkpoint(2).year_counts,
        YearCounts::from([(2020, 25), (2021, 50)])
    );
    // Newest year first, one whole-year window each
    let windows: Vec<_> = portal.queries().iter().filter_map(|q| q.window).collect();
    assert_eq!(windows.first(), DateWindow::whole_year(2021).as_ref());
    assert_eq!(windows.last(), DateWindow::whole_year(2020).as_ref());
    assert_eq!(summary.records_stored, 2 * ROWS_PER_WINDOW as usize);

    // Shard 1 owns the rest of 2020 and sees the same rows again
    let first = ShardSpec::new(2, 1).unwrap();
    let mut engine = harness.engine(&portal, first, WindowPlanner::default());
    let summary = engine.run().await.unwrap();

    assert_eq!(
        harness.checkpoint(1).year_counts,
        YearCounts::from([(2020, 75)])
    );
    assert_eq!(summary.records_stored, 0);
    assert_eq!(summary.records_duplicate, ROWS_PER_WINDOW as usize);
    assert_eq!(harness.records().len(), 2 * ROWS_PER_WINDOW as usize);
}

#[tokio::test]
async fn test_resume_skips_finished_years_and_windows() {
    let harness = Harness::new();
    let key = CheckpointKey::new(STATE_CODE, 1);

    // Traversal order is 2020 then 2019; resume inside 2019 at window 2
    let mut state = ShardState::new(&key, 1);
    state.year_counts = YearCounts::from([(2019, 365), (2020, 365)]);
    state.current_year_index = 1;
    state.current_window_index = 2;
    harness.storage().save_shard_state(&state).unwrap();

    let portal = Arc::new(harness.portal(YearCounts::new()));
    let mut engine = harness.engine(&portal, single_shard(), dense_planner());
    let summary = engine.run().await.unwrap();

    let remaining = &dense_planner().plan(2019, 365)[2..];
    let visited: HashSet<DateWindow> = portal.queries().iter().filter_map(|q| q.window).collect();
    assert_eq!(visited, remaining.iter().copied().collect());

    assert_eq!(summary.years_visited, 1);
    assert_eq!(summary.windows_visited, remaining.len());
    assert_eq!(
        harness.records().len(),
        remaining.len() * ROWS_PER_WINDOW as usize
    );
    assert!(harness.checkpoint(1).completed);
}

#[tokio::test]
async fn test_interrupted_run_resumes_to_the_same_records() {
    let histogram = YearCounts::from([(2020, 365)]);
    let windows = dense_planner().plan(2020, 365);

    let uninterrupted = Harness::new();
    let full = Arc::new(uninterrupted.portal(histogram.clone()));
    uninterrupted
        .engine(&full, single_shard(), dense_planner())
        .run()
        .await
        .unwrap();

    // Fail on the second page of the second window
    let interrupted = Harness::new();
    let fatal_call = SEARCHES_PER_WINDOW + 3;
    let portal = Arc::new(
        interrupted
            .portal(histogram.clone())
            .with_fatal_search(fatal_call),
    );
    let mut engine = interrupted.engine(&portal, single_shard(), dense_planner());
    let result = engine.run().await;
    assert!(matches!(
        result,
        Err(HarvestError::Source(SourceError::Verification(_)))
    ));

    let state = interrupted.checkpoint(1);
    assert!(!state.completed);
    assert_eq!(state.current_window_index, 1);
    assert_eq!(state.current_page_index, 1);
    assert_eq!(state.current_batch_index, 0);
    let done_before = portal.downloads();
    drop(engine);

    let resumed = Arc::new(interrupted.portal(histogram));
    let mut engine = interrupted.engine(&resumed, single_shard(), dense_planner());
    let summary = engine.run().await.unwrap();

    // Pages are requested again from the one in flight, in the same order
    let in_flight = (windows[1], u64::from(PAGE_SIZE));
    let all_pages = full.page_requests();
    let from = all_pages.iter().position(|p| *p == in_flight).unwrap();
    assert_eq!(resumed.page_requests(), all_pages[from..].to_vec());

    // Batches pick up at the first row of that page, nothing repeated or lost
    let all_rows = full.downloads();
    assert_eq!(done_before, all_rows[..done_before.len()].to_vec());
    assert_eq!(resumed.downloads(), all_rows[done_before.len()..].to_vec());
    assert_eq!(
        resumed.downloads().first(),
        Some(&artifact_path(&windows[1], u64::from(PAGE_SIZE)))
    );
    assert_eq!(
        summary.batches_processed,
        all_rows.len() - done_before.len()
    );

    assert_eq!(summary.windows_visited, windows.len() - 1);
    assert_eq!(uninterrupted.records(), interrupted.records());
    assert!(interrupted.checkpoint(1).completed);
}

#[tokio::test]
async fn test_interrupted_batch_resumes_at_that_batch() {
    let histogram = YearCounts::from([(2020, 365)]);
    let windows = dense_planner().plan(2020, 365);

    let uninterrupted = Harness::new();
    let full = Arc::new(uninterrupted.portal(histogram.clone()));
    uninterrupted
        .engine(&full, single_shard(), dense_planner())
        .run()
        .await
        .unwrap();

    // Window 0 holds rows 0..5; the eighth download is row 2 of window 1,
    // the first batch of its second page
    let interrupted = Harness::new();
    let portal = Arc::new(
        interrupted
            .portal(histogram.clone())
            .with_fatal_download(ROWS_PER_WINDOW as usize + 3),
    );
    let mut engine = interrupted.engine(&portal, single_shard(), dense_planner());
    assert!(engine.run().await.is_err());
    drop(engine);

    let state = interrupted.checkpoint(1);
    assert_eq!(
        (
            state.current_window_index,
            state.current_page_index,
            state.current_batch_index
        ),
        (1, 1, 0)
    );

    // Interrupt again on the second batch of the same page
    let portal = Arc::new(
        interrupted
            .portal(histogram.clone())
            .with_fatal_download(2),
    );
    let mut engine = interrupted.engine(&portal, single_shard(), dense_planner());
    assert!(engine.run().await.is_err());
    drop(engine);

    let state = interrupted.checkpoint(1);
    assert_eq!(
        (
            state.current_window_index,
            state.current_page_index,
            state.current_batch_index
        ),
        (1, 1, 1)
    );
    assert_eq!(
        portal.downloads(),
        vec![
            artifact_path(&windows[1], 2),
            artifact_path(&windows[1], 3)
        ]
    );

    let resumed = Arc::new(interrupted.portal(histogram));
    let mut engine = interrupted.engine(&resumed, single_shard(), dense_planner());
    let summary = engine.run().await.unwrap();

    let all_rows = full.downloads();
    let from = all_rows
        .iter()
        .position(|r| *r == artifact_path(&windows[1], 3))
        .unwrap();
    assert_eq!(resumed.downloads(), all_rows[from..].to_vec());
    assert_eq!(summary.batches_processed, all_rows.len() - from);
    assert_eq!(uninterrupted.records(), interrupted.records());
}

#[tokio::test]
async fn test_changed_layout_is_refused_on_resume() {
    let harness = Harness::new();
    let histogram = YearCounts::from([(2020, 365)]);
    let portal = Arc::new(
        harness
            .portal(histogram.clone())
            .with_fatal_search(SEARCHES_PER_WINDOW + 3),
    );
    let mut engine = harness.engine(&portal, single_shard(), dense_planner());
    assert!(engine.run().await.is_err());
    drop(engine);

    // A doubled budget would plan half as many windows under the saved indices
    let key = CheckpointKey::new(STATE_CODE, 1);
    let wider = settings(WindowPlanner::new(0, 200));
    let result = Tracker::open(harness.storage(), &key, &single_shard(), wider.layout());
    assert!(matches!(result, Err(StorageError::LayoutMismatch { .. })));

    let mut smaller_pages = settings(dense_planner());
    smaller_pages.page_size = 1;
    let result = Tracker::open(
        harness.storage(),
        &key,
        &single_shard(),
        smaller_pages.layout(),
    );
    assert!(matches!(result, Err(StorageError::LayoutMismatch { .. })));

    let state = harness.checkpoint(1);
    assert_eq!(state.layout, Some(settings(dense_planner()).layout()));
    assert_eq!(state.current_window_index, 1);
}

#[tokio::test]
async fn test_failed_row_is_isolated_and_replaced_on_rerun() {
    let harness = Harness::new();
    let histogram = YearCounts::from([(2020, 10)]);
    let window = DateWindow::whole_year(2020).unwrap();
    let broken = artifact_path(&window, 2);

    let portal = Arc::new(
        harness
            .portal(histogram.clone())
            .with_failing_download(broken.clone()),
    );
    let mut engine = harness.engine(&portal, single_shard(), WindowPlanner::default());
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.records_failed, 1);
    assert_eq!(summary.records_stored, ROWS_PER_WINDOW as usize);

    let failed_key = ResultRecord::natural_key_for(Some(broken.as_str()), "");
    let records = harness.records();
    assert_eq!(records.len(), ROWS_PER_WINDOW as usize);
    for (key, status) in &records {
        let expected = if *key == failed_key { "failed" } else { "complete" };
        assert_eq!(status, expected);
    }
    drop(engine);

    // A fresh pass replaces the failure marker and leaves the rest alone
    let shard = single_shard();
    let settings = settings(WindowPlanner::default());
    let tracker = Tracker::open_fresh(
        harness.storage(),
        &CheckpointKey::new(STATE_CODE, 1),
        &shard,
        settings.layout(),
    )
    .unwrap();
    let portal = Arc::new(harness.portal(histogram));
    let mut engine = harness.engine_with(&portal, tracker, shard, settings);
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.records_stored, 1);
    assert_eq!(summary.records_duplicate, ROWS_PER_WINDOW as usize - 1);
    assert!(harness
        .records()
        .iter()
        .all(|(_, status)| status == "complete"));
}

#[tokio::test]
async fn test_empty_shard_is_marked_completed() {
    let harness = Harness::new();
    let portal = Arc::new(harness.portal(YearCounts::from([(2020, 10)])));

    let shard = ShardSpec::new(3, 3).unwrap();
    let mut engine = harness.engine(&portal, shard, WindowPlanner::default());
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.years_visited, 0);
    assert!(portal.queries().is_empty());
    let state = harness.checkpoint(3);
    assert!(state.completed);
    assert!(state.year_counts.is_empty());

    let mut rerun = harness.engine(&portal, shard, WindowPlanner::default());
    assert!(rerun.run().await.unwrap().already_completed);
}

#[tokio::test]
async fn test_probe_failure_skips_only_that_window() {
    let harness = Harness::new();
    let windows = dense_planner().plan(2020, 365);
    let skipped = windows[1];

    let portal = Arc::new(
        harness
            .portal(YearCounts::from([(2020, 365)]))
            .with_failing_probe(skipped),
    );
    let mut engine = harness.engine(&portal, single_shard(), dense_planner());
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.windows_skipped, 1);
    assert_eq!(
        portal
            .queries()
            .iter()
            .filter(|q| q.window == Some(skipped))
            .count(),
        1
    );
    assert_eq!(
        harness.records().len(),
        (windows.len() - 1) * ROWS_PER_WINDOW as usize
    );
    assert!(harness.checkpoint(1).completed);
}

#[tokio::test]
async fn test_empty_page_is_skipped() {
    let harness = Harness::new();
    let window = DateWindow::whole_year(2020).unwrap();
    let portal = Arc::new(
        harness
            .portal(YearCounts::from([(2020, 10)]))
            .with_empty_page(window, u64::from(PAGE_SIZE)),
    );

    let mut engine = harness.engine(&portal, single_shard(), WindowPlanner::default());
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(summary.pages_skipped, 1);
    assert_eq!(
        harness.records().len(),
        ROWS_PER_WINDOW as usize - PAGE_SIZE as usize
    );
}
