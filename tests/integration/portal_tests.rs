//! End-to-end harvest against a mock portal
//!
//! These tests use wiremock to stand in for the judgment portal and drive the
//! full stack: configuration, session verification, retrying source, engine,
//! database sink and artifact store.

use async_trait::async_trait;
use judgments_harvester::checkpoint::{CheckpointKey, Tracker};
use judgments_harvester::config::{parse_config, Config};
use judgments_harvester::harvest::{EngineSettings, TraversalEngine};
use judgments_harvester::partition::ShardSpec;
use judgments_harvester::sink::{ArtifactStore, DatabaseSink, SinkGuard};
use judgments_harvester::source::{
    CaptchaSolver, PortalClient, RetryPolicy, RetryingSource, SourceError, SourceResult,
};
use judgments_harvester::storage::{CheckpointStore, RecordStore, SqliteStorage};
use judgments_harvester::HarvestError;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedSolver;

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, _image: &[u8]) -> SourceResult<String> {
        Ok("12".to_string())
    }
}

/// Creates a test configuration pointing at the mock portal
fn create_test_config(portal_url: &str, dir: &Path) -> Config {
    let toml = format!(
        r#"
[portal]
base-url = "{portal_url}/pdfsearch/"
state-code = "16_1"
court-name = "CALCUTTA_HIGH_COURT"
page-size = 100
batch-size = 2

[session]
captcha-command = "unused"
max-verification-attempts = 2

[retry]
max-attempts = 1

[pacing]
inter-batch-delay-ms = 0
window-delay-ms = 0

[output]
database-path = "{db}"
download-dir = "{downloads}"
artifact-dir = "{artifacts}"
artifact-base-url = "https://cdn.example.org/judgments/"
"#,
        portal_url = portal_url,
        db = dir.join("harvest.db").display(),
        downloads = dir.join("downloads").display(),
        artifacts = dir.join("artifacts").display(),
    );
    parse_config(&toml).expect("test config should be valid")
}

fn judgment_row(file: &str, heading: &str) -> String {
    format!(
        r#"<button type="button" class="btn btn-link" onclick="open_pdf('1','','court/2023/{}&search=%20')">{}</button><strong>Judge : JUSTICE A. B. C.</strong>"#,
        file, heading
    )
}

/// Mounts the landing page, CAPTCHA image and CAPTCHA check
async fn mount_session(server: &MockServer, captcha_status: &str) {
    Mock::given(method("GET"))
        .and(path("/pdfsearch/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><input type="hidden" id="app_token" value="t0"></body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pdfsearch/vendor/securimage/securimage_show.php"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 8]))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/pdfsearch/"))
        .and(query_param("p", "pdf_search/checkCaptcha"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"captcha_status": captcha_status, "app_token": "t1"})),
        )
        .mount(server)
        .await;
}

/// Mounts the year data, search, and artifact endpoints
async fn mount_judgments(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/pdfsearch/"))
        .and(query_param("p", "pdf_search/get_year_data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "year_dtls": [{"year": "2023", "count": "3"}],
            "app_token": "t2"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/pdfsearch/"))
        .and(query_param("p", "pdf_search/home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reportrow": {
                "iTotalRecords": "3",
                "aaData": [
                    ["1", judgment_row("a.pdf", "WP/1/2023 of A vs State")],
                    ["2", judgment_row("b.pdf", "CRA/2/2023 of B vs State")],
                    ["3", judgment_row("c.pdf", "FA/3/2023 of C vs D")]
                ]
            },
            "app_token": "t3"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/pdfsearch/"))
        .and(query_param("p", "pdf_search/openpdfcaptcha"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"outputfile": "/files/out.pdf"})),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/out.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
        .mount(server)
        .await;
}

fn build_engine(
    config: &Config,
    sink: &SinkGuard<DatabaseSink>,
) -> TraversalEngine<RetryingSource<PortalClient>, Arc<DatabaseSink>, SqliteStorage> {
    let db_path = Path::new(&config.output.database_path);
    let shard = ShardSpec::new(1, 1).unwrap();
    let key = CheckpointKey::new(config.portal.state_code.clone(), shard.index);
    let settings = EngineSettings::from_config(config);
    let (tracker, _) = Tracker::open(
        SqliteStorage::new(db_path).unwrap(),
        &key,
        &shard,
        settings.layout(),
    )
    .unwrap();

    let portal = PortalClient::from_config(config, Arc::new(FixedSolver)).unwrap();
    let source = RetryingSource::new(portal, RetryPolicy::from_config(&config.retry));

    TraversalEngine::new(source, sink.handle(), tracker, shard, settings)
}

fn open_sink(config: &Config) -> SinkGuard<DatabaseSink> {
    let artifacts = ArtifactStore::new(
        &config.output.artifact_dir,
        config.output.artifact_base_url.clone(),
    );
    SinkGuard::new(DatabaseSink::open(Path::new(&config.output.database_path), artifacts).unwrap())
}

#[tokio::test]
async fn test_full_harvest_single_year() {
    let server = MockServer::start().await;
    mount_session(&server, "Y").await;
    mount_judgments(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let sink = open_sink(&config);

    let mut engine = build_engine(&config, &sink);
    let summary = engine.run().await.expect("harvest failed");
    sink.release().unwrap();

    assert_eq!(summary.years_visited, 1);
    assert_eq!(summary.windows_visited, 1);
    assert_eq!(summary.pages_fetched, 1);
    assert_eq!(summary.batches_processed, 2);
    assert_eq!(summary.records_stored, 3);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.count_records().unwrap(), 3);
    assert_eq!(storage.count_records_by_status().unwrap().get("complete"), Some(&3));

    let conn = rusqlite::Connection::open(&config.output.database_path).unwrap();
    let mut stmt = conn
        .prepare("SELECT court, artifact_url FROM records ORDER BY artifact_url")
        .unwrap();
    let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        rows,
        vec![
            (
                "calcutta high court".to_string(),
                "https://cdn.example.org/judgments/a.pdf".to_string()
            ),
            (
                "calcutta high court".to_string(),
                "https://cdn.example.org/judgments/b.pdf".to_string()
            ),
            (
                "calcutta high court".to_string(),
                "https://cdn.example.org/judgments/c.pdf".to_string()
            ),
        ]
    );
    assert!(dir.path().join("artifacts").join("a.pdf").is_file());
    assert!(!dir.path().join("downloads").join("a.pdf").exists());

    let state = storage
        .load_shard_state(&CheckpointKey::new("16_1", 1))
        .unwrap()
        .unwrap();
    assert!(state.completed);

    // The session is verified once for the whole run
    let checks = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query() == Some("p=pdf_search/checkCaptcha"))
        .count();
    assert_eq!(checks, 1);
}

#[tokio::test]
async fn test_rejected_verification_stops_the_run() {
    let server = MockServer::start().await;
    mount_session(&server, "N").await;
    mount_judgments(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let sink = open_sink(&config);

    let mut engine = build_engine(&config, &sink);
    let result = engine.run().await;
    assert!(matches!(
        result,
        Err(HarvestError::Source(SourceError::Verification(_)))
    ));
    drop(engine);
    drop(sink);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    let state = storage
        .load_shard_state(&CheckpointKey::new("16_1", 1))
        .unwrap()
        .unwrap();
    assert!(!state.completed);
    assert!(state.year_counts.is_empty());
    assert_eq!(storage.count_records().unwrap(), 0);

    let checks = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query() == Some("p=pdf_search/checkCaptcha"))
        .count();
    assert_eq!(checks, 2);
}

#[tokio::test]
async fn test_expired_session_is_renewed_mid_run() {
    let server = MockServer::start().await;
    mount_session(&server, "Y").await;

    // The first search after verification finds the session already expired
    Mock::given(method("POST"))
        .and(path("/pdfsearch/"))
        .and(query_param("p", "pdf_search/home"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errormsg": "Session expired"})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_judgments(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let sink = open_sink(&config);

    let mut engine = build_engine(&config, &sink);
    let summary = engine.run().await.expect("harvest failed");
    sink.release().unwrap();

    assert_eq!(summary.windows_skipped, 0);
    assert_eq!(summary.records_stored, 3);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.count_records_by_status().unwrap().get("complete"), Some(&3));

    let checks = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query() == Some("p=pdf_search/checkCaptcha"))
        .count();
    assert_eq!(checks, 2);
}
