//! HTTP client for a running Refinery Eye server.
//!
//! [`ApiClient`] is a thin typed wrapper over the JSON API that keeps the
//! session cookie between calls. [`InspectionClient`] drives one inspection
//! through [`InspectionFlow`]: upload, analyze, save.
//!
//! Server errors come back as [`InspectError`] rebuilt from the `{error,
//! code}` body, so a rejected login is `InvalidCredentials` while an
//! unreachable server is `Network`.

use reqwest::multipart::{Form, Part};
use reqwest::{header, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;

use refinery_eye_core::flow::{AnalysisStart, InspectionFlow};
use refinery_eye_core::models::{AnalysisResult, NewReport, Report, UploadedAsset};
use refinery_eye_core::{InspectError, Result};

use crate::export::ExportFormat;
use crate::service::IncomingFile;
use crate::session::SESSION_COOKIE;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredFile {
    url: String,
    filename: String,
    storage_path: String,
}

#[derive(Deserialize)]
struct ReferencesResponse {
    files: Vec<StoredFile>,
    #[serde(default)]
    skipped: Vec<String>,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    result: AnalysisResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    report_id: String,
}

#[derive(Deserialize)]
struct ReportsResponse {
    reports: Vec<Report>,
}

#[derive(Deserialize)]
struct ReportResponse {
    report: Report,
}

#[derive(Deserialize)]
struct StatusResponse {
    authenticated: bool,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    cookie: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| InspectError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.cookie.read().unwrap().as_deref() {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| InspectError::Network(e.to_string()))?;
        self.remember_cookie(&resp);

        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => InspectError::from_api(status, body.code.as_deref(), body.error),
            Err(_) => InspectError::from_api(status, None, text),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| InspectError::Network(format!("unexpected response body: {}", e)))
    }

    fn remember_cookie(&self, resp: &Response) {
        let prefix = format!("{}=", SESSION_COOKIE);
        let pair = resp
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find(|pair| pair.trim().starts_with(&prefix));
        if let Some(pair) = pair {
            let pair = pair.trim();
            *self.cookie.write().unwrap() = if pair.len() > prefix.len() {
                Some(pair.to_string())
            } else {
                None
            };
        }
    }

    pub fn has_session_cookie(&self) -> bool {
        self.cookie.read().unwrap().is_some()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let builder = self
            .request(reqwest::Method::POST, "/api/login")
            .json(&json!({ "username": username, "password": password }));
        self.send(builder).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.send(self.request(reqwest::Method::POST, "/api/logout"))
            .await?;
        *self.cookie.write().unwrap() = None;
        Ok(())
    }

    pub async fn auth_status(&self) -> Result<bool> {
        let status: StatusResponse = self
            .send_json(self.request(reqwest::Method::GET, "/api/auth/status"))
            .await?;
        Ok(status.authenticated)
    }

    pub async fn upload_video(&self, file: IncomingFile) -> Result<UploadedAsset> {
        let mime_type = file.effective_mime();
        let size = file.bytes.len() as u64;
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&mime_type)
            .map_err(|e| InspectError::bad_request(e.to_string()))?;
        let builder = self
            .request(reqwest::Method::POST, "/api/upload-video")
            .multipart(Form::new().part("video", part));

        let stored: StoredFile = self.send_json(builder).await?;
        Ok(UploadedAsset {
            locator: stored.url,
            storage_path: stored.storage_path,
            original_name: stored.filename,
            mime_type,
            size,
        })
    }

    /// Returns the stored PDFs and the names the server skipped.
    pub async fn upload_references(
        &self,
        files: Vec<IncomingFile>,
    ) -> Result<(Vec<UploadedAsset>, Vec<String>)> {
        let mut sizes = Vec::with_capacity(files.len());
        let mut form = Form::new();
        for file in files {
            sizes.push((file.file_name.clone(), file.bytes.len() as u64));
            let mime_type = file.effective_mime();
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&mime_type)
                .map_err(|e| InspectError::bad_request(e.to_string()))?;
            form = form.part("references", part);
        }
        let builder = self
            .request(reqwest::Method::POST, "/api/upload-references")
            .multipart(form);

        let resp: ReferencesResponse = self.send_json(builder).await?;
        let assets = resp
            .files
            .into_iter()
            .map(|f| {
                let size = sizes
                    .iter()
                    .find(|(name, _)| *name == f.filename)
                    .map(|(_, size)| *size)
                    .unwrap_or(0);
                UploadedAsset {
                    locator: f.url,
                    storage_path: f.storage_path,
                    original_name: f.filename,
                    mime_type: "application/pdf".to_string(),
                    size,
                }
            })
            .collect();
        Ok((assets, resp.skipped))
    }

    pub async fn analyze(
        &self,
        video_locator: &str,
        reference_locators: &[String],
        reference_links: &[String],
    ) -> Result<AnalysisResult> {
        let builder = self
            .request(reqwest::Method::POST, "/api/analyze")
            .json(&json!({
                "videoUrl": video_locator,
                "referenceUrls": reference_locators,
                "referenceUrlsList": reference_links,
            }));
        let resp: AnalyzeResponse = self.send_json(builder).await?;
        Ok(resp.result)
    }

    pub async fn save_report(&self, report: &NewReport) -> Result<String> {
        let builder = self
            .request(reqwest::Method::POST, "/api/save-report")
            .json(&json!({
                "videoUrl": report.video_locator,
                "videoFileName": report.video_file_name,
                "referenceUrls": report.reference_locators,
                "referenceFileNames": report.reference_file_names,
                "referenceLinks": report.reference_links,
                "result": report.result,
            }));
        let resp: SaveResponse = self.send_json(builder).await?;
        Ok(resp.report_id)
    }

    pub async fn list_reports(&self) -> Result<Vec<Report>> {
        let resp: ReportsResponse = self
            .send_json(self.request(reqwest::Method::GET, "/api/reports"))
            .await?;
        Ok(resp.reports)
    }

    pub async fn get_report(&self, id: &str) -> Result<Report> {
        let resp: ReportResponse = self
            .send_json(self.request(reqwest::Method::GET, &format!("/api/reports/{}", id)))
            .await?;
        Ok(resp.report)
    }

    pub async fn delete_report(&self, id: &str) -> Result<()> {
        let _: Value = self
            .send_json(self.request(reqwest::Method::DELETE, &format!("/api/reports/{}", id)))
            .await?;
        Ok(())
    }

    pub async fn export_report(&self, id: &str, format: ExportFormat) -> Result<String> {
        let path = format!("/api/reports/{}/export?format={}", id, format.extension());
        self.send(self.request(reqwest::Method::GET, &path))
            .await?
            .text()
            .await
            .map_err(|e| InspectError::Network(e.to_string()))
    }
}

/// One inspection driven end to end against the server.
pub struct InspectionClient {
    api: ApiClient,
    flow: InspectionFlow,
}

impl InspectionClient {
    pub fn new(api: ApiClient, max_video_bytes: u64) -> Self {
        Self {
            api,
            flow: InspectionFlow::new(max_video_bytes),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn flow(&self) -> &InspectionFlow {
        &self.flow
    }

    /// Upload the video and any reference documents concurrently.
    ///
    /// An oversized video is refused before any request is made. When the
    /// video lands but the documents fail, the flow is still ready to
    /// analyze and the document error is returned.
    pub async fn upload_assets(
        &mut self,
        video: IncomingFile,
        references: Vec<IncomingFile>,
    ) -> Result<Vec<String>> {
        self.flow.select_video(video.bytes.len() as u64)?;

        let api = &self.api;
        let (video_result, references_result) = tokio::join!(api.upload_video(video), async {
            if references.is_empty() {
                Ok((Vec::new(), Vec::new()))
            } else {
                api.upload_references(references).await
            }
        });

        match video_result {
            Ok(asset) => self.flow.video_uploaded(asset)?,
            Err(e) => {
                self.flow.video_upload_failed(e.to_string())?;
                return Err(e);
            }
        }

        let (assets, skipped) = references_result?;
        for asset in assets {
            self.flow.add_reference(asset)?;
        }
        Ok(skipped)
    }

    /// Upload reference documents on their own, in any state but
    /// `Analyzing`. Returns the names the server skipped as non-PDF.
    pub async fn add_references(&mut self, files: Vec<IncomingFile>) -> Result<Vec<String>> {
        if !self.flow.can_edit_references() {
            return Err(InspectError::invalid_state(
                "references cannot change while analysis is running",
            ));
        }
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let (assets, skipped) = self.api.upload_references(files).await?;
        for asset in assets {
            self.flow.add_reference(asset)?;
        }
        Ok(skipped)
    }

    pub fn remove_reference(&mut self, index: usize) -> Result<UploadedAsset> {
        self.flow.remove_reference(index)
    }

    pub fn add_reference_link(&mut self, url: &str) -> Result<()> {
        self.flow.add_reference_link(url)
    }

    pub fn remove_reference_link(&mut self, index: usize) -> Result<String> {
        self.flow.remove_reference_link(index)
    }

    /// Run analysis. `confirm` is asked only when no references were given.
    pub async fn analyze(&mut self, confirm: impl FnOnce() -> bool) -> Result<AnalysisStart> {
        let start = self.flow.begin_analysis(confirm)?;
        if let AnalysisStart::Started(plan) = &start {
            match self
                .api
                .analyze(
                    &plan.video_locator,
                    &plan.reference_locators,
                    &plan.reference_links,
                )
                .await
            {
                Ok(result) => self.flow.analysis_succeeded(result)?,
                Err(e) => {
                    self.flow.analysis_failed(e.to_string())?;
                    return Err(e);
                }
            }
        }
        Ok(start)
    }

    /// Persist the completed result. On failure the result is kept so the
    /// save can be retried.
    pub async fn save(&mut self) -> Result<String> {
        let (video, result) = match (self.flow.video(), self.flow.result()) {
            (Some(video), Some(result)) => (video, result),
            (None, _) => return Err(InspectError::MissingVideo),
            (_, None) => return Err(InspectError::invalid_state("no analysis result to save")),
        };
        let report = NewReport {
            video_locator: video.locator.clone(),
            video_file_name: video.original_name.clone(),
            reference_locators: self.flow.references().iter().map(|r| r.locator.clone()).collect(),
            reference_file_names: self
                .flow
                .references()
                .iter()
                .map(|r| r.original_name.clone())
                .collect(),
            reference_links: self.flow.reference_links().to_vec(),
            result: result.clone(),
        };

        match self.api.save_report(&report).await {
            Ok(id) => {
                self.flow.report_saved(id.clone())?;
                Ok(id)
            }
            Err(e) => {
                self.flow.save_failed(e.to_string())?;
                Err(e)
            }
        }
    }

    pub fn reset(&mut self) {
        self.flow.reset();
    }

    /// End the session and drop all in-memory inspection state.
    pub async fn logout(&mut self) -> Result<()> {
        self.flow.reset();
        self.api.logout().await
    }
}

/// Options for [`run_inspect`].
pub struct InspectOptions<'a> {
    pub server: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub video: &'a std::path::Path,
    pub references: &'a [std::path::PathBuf],
    pub links: &'a [String],
    pub max_video_bytes: u64,
    /// Proceed without asking when no references are given.
    pub assume_yes: bool,
}

async fn read_local(path: &std::path::Path) -> anyhow::Result<IncomingFile> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(IncomingFile {
        file_name,
        mime_type: String::new(),
        bytes,
    })
}

fn ask_to_continue() -> bool {
    eprint!("No reference standards provided. Analyze against general best practices? [y/N] ");
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// CLI entry point: log in, upload, analyze, save, and print the report id.
pub async fn run_inspect(opts: InspectOptions<'_>) -> anyhow::Result<()> {
    let api = ApiClient::new(opts.server)?;
    api.login(opts.username, opts.password).await?;

    let mut client = InspectionClient::new(api, opts.max_video_bytes);
    let assume_yes = opts.assume_yes;
    let confirm = || assume_yes || ask_to_continue();
    if let Some(id) = inspect_and_logout(&mut client, &opts, confirm).await? {
        println!("{}", id);
    }
    Ok(())
}

/// Drive one inspection on a logged-in client and end its session on
/// every path. `Ok(None)` means the no-reference confirmation was declined.
pub async fn inspect_and_logout(
    client: &mut InspectionClient,
    opts: &InspectOptions<'_>,
    confirm: impl FnOnce() -> bool,
) -> anyhow::Result<Option<String>> {
    let outcome = inspect_and_save(client, opts, confirm).await;
    if let Err(e) = client.logout().await {
        tracing::warn!(error = %e, "logout failed");
    }
    outcome
}

async fn inspect_and_save(
    client: &mut InspectionClient,
    opts: &InspectOptions<'_>,
    confirm: impl FnOnce() -> bool,
) -> anyhow::Result<Option<String>> {
    let video = read_local(opts.video).await?;
    let mut references = Vec::with_capacity(opts.references.len());
    for path in opts.references {
        references.push(read_local(path).await?);
    }
    for link in opts.links {
        client.add_reference_link(link)?;
    }

    eprintln!("Uploading {} ...", video.file_name);
    let skipped = client.upload_assets(video, references).await?;
    for name in &skipped {
        eprintln!("Skipped non-PDF reference: {}", name);
    }

    eprintln!("Analyzing (this can take a few minutes) ...");
    if let AnalysisStart::Declined = client.analyze(confirm).await? {
        eprintln!("Analysis cancelled.");
        return Ok(None);
    }

    if let Some(result) = client.flow().result() {
        eprintln!("Found {} issue(s).", result.findings.len());
    }
    let id = client.save().await?;
    Ok(Some(id))
}
