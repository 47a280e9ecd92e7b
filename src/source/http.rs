//! HTTP portal client
//!
//! This module implements [`SourceClient`] against the judgment portal:
//! - Building the HTTP client (cookies, compression, timeouts)
//! - Session initialisation and `app_token` tracking
//! - CAPTCHA verification through a [`CaptchaSolver`]
//! - Datatables-style search requests
//! - Artifact download
//! - Error classification

use crate::config::{Config, PortalConfig};
use crate::partition::YearCounts;
use crate::source::{
    CaptchaSolver, RawRecord, SearchPage, SearchQuery, SourceClient, SourceError, SourceResult,
};
use crate::{ConfigError, HarvestError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use url::Url;

const SEARCH_ENDPOINT: &str = "?p=pdf_search/home";
const CAPTCHA_CHECK_ENDPOINT: &str = "?p=pdf_search/checkCaptcha";
const OPEN_PDF_ENDPOINT: &str = "?p=pdf_search/openpdfcaptcha";
const YEAR_DATA_ENDPOINT: &str = "?p=pdf_search/get_year_data";
const CAPTCHA_IMAGE_PATH: &str = "vendor/securimage/securimage_show.php";

/// Builds an HTTP client with proper configuration
///
/// The cookie store carries the portal session between requests.
pub fn build_http_client(config: &PortalConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Connection settings for a [`PortalClient`]
#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub base_url: Url,
    pub state_code: String,
    pub max_verification_attempts: u32,
    pub download_dir: PathBuf,
}

impl PortalSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.portal.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", config.portal.base_url, e)))?;

        Ok(Self {
            base_url,
            state_code: config.portal.state_code.clone(),
            max_verification_attempts: config.session.max_verification_attempts,
            download_dir: PathBuf::from(&config.output.download_dir),
        })
    }
}

#[derive(Debug, Default)]
struct Session {
    initialized: bool,
    verified: bool,
    app_token: Option<String>,
}

impl Session {
    /// Forgets the portal session so the next request starts a new one
    fn reset(&mut self) {
        *self = Session::default();
    }
}

/// Judgment portal client
pub struct PortalClient {
    client: Client,
    settings: PortalSettings,
    solver: Arc<dyn CaptchaSolver>,
    session: Mutex<Session>,
}

impl PortalClient {
    pub fn new(client: Client, settings: PortalSettings, solver: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            client,
            settings,
            solver,
            session: Mutex::new(Session::default()),
        }
    }

    /// Builds a client from the validated configuration
    pub fn from_config(
        config: &Config,
        solver: Arc<dyn CaptchaSolver>,
    ) -> Result<Self, HarvestError> {
        let client = build_http_client(&config.portal)?;
        let settings = PortalSettings::from_config(config)?;
        Ok(Self::new(client, settings, solver))
    }

    fn endpoint(&self, relative: &str) -> SourceResult<Url> {
        self.settings
            .base_url
            .join(relative)
            .map_err(|e| SourceError::Portal(format!("invalid endpoint {}: {}", relative, e)))
    }

    /// Initialises and verifies the session on first use
    async fn ensure_session(&self, session: &mut Session) -> SourceResult<()> {
        if !session.initialized {
            self.initialize(session).await?;
        }
        if !session.verified {
            self.verify(session).await?;
        }
        Ok(())
    }

    /// Drops the current session and verifies a new one
    ///
    /// The portal answers an expired session with an error message in place
    /// of the expected payload, so callers renew once before giving up.
    async fn renew_session(&self, session: &mut Session) -> SourceResult<()> {
        tracing::warn!("Portal answer lacked its payload; renewing the session");
        session.reset();
        self.ensure_session(session).await
    }

    async fn initialize(&self, session: &mut Session) -> SourceResult<()> {
        tracing::info!("Initializing portal session");
        let url = self.settings.base_url.clone();
        let response = self.client.get(url).send().await.map_err(classify)?;
        let body = check_status(response)?.text().await.map_err(classify)?;

        session.app_token = extract_app_token(&body);
        if session.app_token.is_some() {
            tracing::info!("Initial app_token acquired");
        } else {
            tracing::warn!("No app_token found on the portal landing page");
        }
        session.initialized = true;
        Ok(())
    }

    async fn verify(&self, session: &mut Session) -> SourceResult<()> {
        let attempts = self.settings.max_verification_attempts.max(1);

        for attempt in 1..=attempts {
            tracing::info!("Verification attempt {}/{}", attempt, attempts);
            match self.verify_once(session).await {
                Ok(true) => {
                    session.verified = true;
                    tracing::info!("CAPTCHA verification successful");
                    return Ok(());
                }
                Ok(false) => tracing::warn!("CAPTCHA attempt {} rejected", attempt),
                Err(e) => tracing::warn!("CAPTCHA attempt {} failed: {}", attempt, e),
            }
        }

        tracing::error!("Failed to verify CAPTCHA after {} attempts", attempts);
        Err(SourceError::Verification(format!(
            "CAPTCHA not accepted after {} attempts",
            attempts
        )))
    }

    async fn verify_once(&self, session: &mut Session) -> SourceResult<bool> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let image_url = self.endpoint(&format!("{}?{}", CAPTCHA_IMAGE_PATH, millis))?;
        tracing::debug!("Fetching CAPTCHA from {}", image_url);

        let response = self.client.get(image_url).send().await.map_err(classify)?;
        let image = check_status(response)?.bytes().await.map_err(classify)?;

        let answer = self.solver.solve(&image).await?;

        let form = vec![
            ("captcha", answer),
            ("search_text", String::new()),
            ("search_opt", "PHRASE".to_string()),
            ("escr_flag", String::new()),
            ("proximity", String::new()),
            ("sel_lang", String::new()),
            ("ajax_req", "true".to_string()),
            ("app_token", session.app_token.clone().unwrap_or_default()),
        ];
        let result = self.post_json(CAPTCHA_CHECK_ENDPOINT, &form, session).await?;

        Ok(result.get("captcha_status").and_then(Value::as_str) == Some("Y"))
    }

    /// POSTs a form and decodes the JSON answer, refreshing the session token
    async fn post_json(
        &self,
        endpoint: &str,
        form: &[(&str, String)],
        session: &mut Session,
    ) -> SourceResult<Value> {
        let url = self.endpoint(endpoint)?;
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(classify)?;
        let body = check_status(response)?.text().await.map_err(classify)?;

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            SourceError::Portal(format!(
                "invalid JSON from {}: {} ({})",
                endpoint,
                e,
                truncate(&body, 200)
            ))
        })?;

        if let Some(token) = value.get("app_token").and_then(Value::as_str) {
            session.app_token = Some(token.to_string());
            tracing::trace!("Updated app_token");
        }

        Ok(value)
    }

    fn search_form(&self, query: &SearchQuery, session: &Session) -> Vec<(&'static str, String)> {
        let (from_date, to_date) = query
            .window
            .map(|w| (w.start_param(), w.end_param()))
            .unwrap_or_default();

        let mut form = vec![
            ("sEcho", "1".to_string()),
            ("iColumns", "2".to_string()),
            ("sColumns", ",".to_string()),
            ("iDisplayStart", query.offset.to_string()),
            ("iDisplayLength", query.page_size.to_string()),
            ("mDataProp_0", "0".to_string()),
            ("mDataProp_1", "1".to_string()),
            ("iSortCol_0", "0".to_string()),
            ("sSortDir_0", "asc".to_string()),
            ("iSortingCols", "1".to_string()),
            ("state_code", self.settings.state_code.clone()),
            ("from_date", from_date),
            ("to_date", to_date),
            ("search_opt", "PHRASE".to_string()),
            ("date_val", "ALL".to_string()),
            ("fcourt_type", "2".to_string()),
            ("ajax_req", "true".to_string()),
            ("app_token", session.app_token.clone().unwrap_or_default()),
        ];
        for key in [
            "search_txt1",
            "search_txt2",
            "search_txt3",
            "search_txt4",
            "search_txt5",
            "pet_res",
            "dist_code",
            "case_no",
            "case_year",
            "judge_name",
            "reg_year",
            "captcha",
        ] {
            form.push((key, String::new()));
        }
        form
    }

    async fn search_once(
        &self,
        query: &SearchQuery,
        session: &mut Session,
    ) -> SourceResult<Option<SearchPage>> {
        let form = self.search_form(query, session);
        let result = self.post_json(SEARCH_ENDPOINT, &form, session).await?;
        parse_search_page(&result, query.offset)
    }

    /// Asks the portal to stage an artifact, returning the staged file path
    async fn open_artifact(
        &self,
        artifact_ref: &str,
        session: &mut Session,
    ) -> SourceResult<Option<String>> {
        let path_with_params = format!(
            "{}#page=&search=+&citation_year=&fcourt_type=2&file_type=undefined&nc_display=undefined",
            artifact_ref
        );
        let form = vec![
            ("val", "0".to_string()),
            ("lang_flg", "undefined".to_string()),
            ("path", path_with_params),
            ("ajax_req", "true".to_string()),
            ("app_token", session.app_token.clone().unwrap_or_default()),
        ];
        let result = self.post_json(OPEN_PDF_ENDPOINT, &form, session).await?;

        if let Some(output_file) = result.get("outputfile").and_then(Value::as_str) {
            return Ok(Some(output_file.to_string()));
        }

        let reason = result
            .get("errormsg")
            .and_then(Value::as_str)
            .unwrap_or("no error message provided");
        tracing::warn!("No artifact for {}: {}", artifact_ref, reason);
        Ok(None)
    }

    async fn save_artifact(&self, response: Response, output_path: &Path) -> SourceResult<()> {
        let mut response = check_status(response)?;
        let mut file = tokio::fs::File::create(output_path).await?;

        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SourceClient for PortalClient {
    async fn search(&self, query: &SearchQuery) -> SourceResult<Option<SearchPage>> {
        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        tracing::debug!(
            "Searching {} offset {} length {}",
            query
                .window
                .map(|w| w.to_string())
                .unwrap_or_else(|| "all dates".to_string()),
            query.offset,
            query.page_size
        );
        if let Some(page) = self.search_once(query, &mut session).await? {
            return Ok(Some(page));
        }

        self.renew_session(&mut session).await?;
        self.search_once(query, &mut session).await
    }

    async fn download(&self, artifact_ref: &str) -> SourceResult<Option<PathBuf>> {
        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        tokio::fs::create_dir_all(&self.settings.download_dir).await?;
        let output_path = self.settings.download_dir.join(artifact_file_name(artifact_ref));

        let output_file = match self.open_artifact(artifact_ref, &mut session).await? {
            Some(file) => file,
            None => {
                self.renew_session(&mut session).await?;
                match self.open_artifact(artifact_ref, &mut session).await? {
                    Some(file) => file,
                    None => return Ok(None),
                }
            }
        };

        let artifact_url = self
            .endpoint("/")?
            .join(&output_file)
            .map_err(|e| SourceError::Portal(format!("invalid outputfile {}: {}", output_file, e)))?;
        tracing::info!("Downloading artifact from {}", artifact_url);

        let response = self
            .client
            .get(artifact_url)
            .header(ACCEPT, "*/*")
            .send()
            .await
            .map_err(classify)?;
        self.save_artifact(response, &output_path).await?;

        tracing::debug!("Saved artifact to {}", output_path.display());
        Ok(Some(output_path))
    }

    async fn fetch_year_histogram(&self) -> SourceResult<YearCounts> {
        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        let form = vec![
            ("state_code", self.settings.state_code.clone()),
            ("ajax_req", "true".to_string()),
            ("app_token", session.app_token.clone().unwrap_or_default()),
        ];
        let result = self
            .post_json(YEAR_DATA_ENDPOINT, &form, &mut session)
            .await?;

        let counts = parse_year_histogram(&result)?;
        tracing::info!("Portal reports {} years of data", counts.len());
        Ok(counts)
    }
}

/// Maps a reqwest failure onto the source error taxonomy
fn classify(error: reqwest::Error) -> SourceError {
    if let Some(status) = error.status() {
        return SourceError::Http {
            status: status.as_u16(),
            url: error.url().map(|u| u.to_string()).unwrap_or_default(),
        };
    }

    if error.is_timeout() {
        SourceError::Transient("request timeout".to_string())
    } else if error.is_connect() {
        SourceError::Transient(format!("connection failed: {}", error))
    } else if error.is_decode() {
        SourceError::Portal(format!("undecodable response: {}", error))
    } else {
        SourceError::Transient(error.to_string())
    }
}

fn check_status(response: Response) -> SourceResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SourceError::Http {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// Reads the session token from `input#app_token` or an inline script
fn extract_app_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    if let Ok(selector) = Selector::parse("input#app_token") {
        let token = document
            .select(&selector)
            .filter_map(|input| input.value().attr("value"))
            .map(str::trim)
            .find(|value| !value.is_empty());
        if let Some(token) = token {
            return Some(token.to_string());
        }
    }

    let selector = Selector::parse("script").ok()?;
    document.select(&selector).find_map(|script| {
        let text: String = script.text().collect();
        let start = text.find("app_token=")? + "app_token=".len();
        let token: String = text[start..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        (!token.is_empty()).then_some(token)
    })
}

/// Interprets a count that may be encoded as a number or a string
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_search_page(result: &Value, offset: u64) -> SourceResult<Option<SearchPage>> {
    let Some(report) = result.get("reportrow").filter(|r| !r.is_null()) else {
        tracing::debug!("Search response carried no result set");
        return Ok(None);
    };

    let total_records = report
        .get("iTotalRecords")
        .and_then(as_count)
        .ok_or_else(|| SourceError::Portal("missing iTotalRecords in search result".into()))?;

    let rows = report
        .get("aaData")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let items = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let html = match row {
                Value::Array(cells) => cells
                    .get(1)
                    .or_else(|| cells.first())
                    .and_then(Value::as_str)?,
                Value::String(s) => s.as_str(),
                _ => return None,
            };
            Some(RawRecord {
                html: html.to_string(),
                row: offset + i as u64,
            })
        })
        .collect();

    Ok(Some(SearchPage {
        total_records,
        items,
    }))
}

fn parse_year_histogram(result: &Value) -> SourceResult<YearCounts> {
    let details = result
        .get("year_dtls")
        .ok_or_else(|| SourceError::Portal("missing year_dtls in year data".into()))?;

    let mut counts = YearCounts::new();
    match details {
        Value::Array(entries) => {
            for entry in entries {
                let year = entry.get("year").and_then(as_count);
                let count = entry
                    .get("count")
                    .or_else(|| entry.get("total"))
                    .and_then(as_count);
                match (year, count) {
                    (Some(year), Some(count)) => {
                        let year = i32::try_from(year).map_err(|_| {
                            SourceError::Portal(format!("year {} out of range", year))
                        })?;
                        *counts.entry(year).or_insert(0) += count;
                    }
                    _ => tracing::warn!("Skipping malformed year entry: {}", entry),
                }
            }
        }
        Value::Object(map) => {
            for (year, count) in map {
                match (year.trim().parse::<i32>(), as_count(count)) {
                    (Ok(year), Some(count)) => {
                        *counts.entry(year).or_insert(0) += count;
                    }
                    _ => tracing::warn!("Skipping malformed year entry: {} = {}", year, count),
                }
            }
        }
        other => {
            return Err(SourceError::Portal(format!(
                "unexpected year_dtls shape: {}",
                other
            )))
        }
    }

    Ok(counts)
}

/// Local file name for an artifact path
fn artifact_file_name(artifact_ref: &str) -> String {
    let path = artifact_ref.split('#').next().unwrap_or(artifact_ref);
    let name = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("artifact");
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name.to_string()
    } else {
        format!("{}.pdf", name)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
