//! End-to-end tests against a real server on a free port.
//!
//! Each test gets its own temp directory (database and upload root) and a
//! scripted model in place of Gemini.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use refinery_eye::client::{inspect_and_logout, ApiClient, InspectOptions, InspectionClient};
use refinery_eye::config::Config;
use refinery_eye::export::ExportFormat;
use refinery_eye::gateway::{GenerateRequest, MediaState, ModelClient, RemoteMedia};
use refinery_eye::server;
use refinery_eye::service::IncomingFile;
use refinery_eye::session::hash_password;
use refinery_eye_core::flow::{AnalysisStart, FlowState};
use refinery_eye_core::InspectError;

const USERNAME: &str = "inspector";
const PASSWORD: &str = "hunter2";
const MAX_VIDEO_BYTES: u64 = 1024;

const TWO_FINDINGS: &str = r#"{
  "summary": "Gland leak on a control valve and a loose junction box cover.",
  "inspection_report": [
    {
      "serial_no": 1,
      "timestamp": "00:12",
      "tag_number": "20-FV-2300",
      "equipment_type": "Control Valve",
      "fault_type": "Gland Packing Leak",
      "severity": "High",
      "corrective_action": "Repack gland and retest",
      "remarks": "Active drip at stem",
      "standard_reference": "OISD-STD-137"
    },
    {
      "serial_no": 2,
      "timestamp": "01:05",
      "tag_number": "Near Unit 3",
      "equipment_type": "Junction Box",
      "fault_type": "Cover Bolts Missing",
      "severity": "Low",
      "corrective_action": "Replace bolts",
      "remarks": ""
    }
  ]
}"#;

// ─── Helpers ────────────────────────────────────────────────────────

/// Model that is immediately active and always answers `answer`.
struct FakeModel {
    answer: String,
    generates: AtomicU32,
    deletes: AtomicU32,
}

impl FakeModel {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            generates: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn upload_media(
        &self,
        _bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> anyhow::Result<RemoteMedia> {
        Ok(RemoteMedia {
            name: format!("files/{}", display_name),
            uri: format!("https://files.test/{}", display_name),
            mime_type: mime_type.to_string(),
        })
    }

    async fn media_state(&self, _media: &RemoteMedia) -> anyhow::Result<MediaState> {
        Ok(MediaState::Active)
    }

    async fn delete_media(&self, _media: &RemoteMedia) -> anyhow::Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(&self, _request: GenerateRequest) -> anyhow::Result<String> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn test_config(root: &Path, port: u16) -> Config {
    let salt = "00ff10ee";
    let hash = hash_password(PASSWORD, salt).unwrap();
    let toml_str = format!(
        r#"
[server]
bind = "127.0.0.1:{port}"

[db]
path = "{db}"

[auth]
username = "{USERNAME}"
password_hash = "{hash}"
salt = "{salt}"
session_secret_env = "REYE_TEST_SESSION_SECRET_UNSET"

[storage]
backend = "local"
local_dir = "{uploads}"

[uploads]
max_video_bytes = {MAX_VIDEO_BYTES}
max_reference_files = 5

[gateway]
api_key_env = "REYE_TEST_MODEL_KEY_UNSET"
poll_interval_ms = 1
max_poll_attempts = 3
"#,
        db = root.join("data/reports.sqlite").display(),
        uploads = root.join("uploads").display(),
    );
    toml::from_str(&toml_str).unwrap()
}

struct TestServer {
    tmp: TempDir,
    base_url: String,
    model: Arc<FakeModel>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(answer: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let port = find_free_port();
        let cfg = test_config(tmp.path(), port);
        let model = FakeModel::new(answer);
        let injected: Arc<dyn ModelClient> = model.clone();

        let handle =
            tokio::spawn(async move { server::run_server_with_model(&cfg, Some(injected)).await });
        wait_for_server(port).await;

        Self {
            tmp,
            base_url: format!("http://127.0.0.1:{}", port),
            model,
            handle,
        }
    }

    fn uploads(&self) -> std::path::PathBuf {
        self.tmp.path().join("uploads")
    }

    async fn logged_in(&self) -> ApiClient {
        let api = ApiClient::new(&self.base_url).unwrap();
        api.login(USERNAME, PASSWORD).await.unwrap();
        api
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn video(len: usize) -> IncomingFile {
    IncomingFile {
        file_name: "walkdown.mp4".into(),
        mime_type: "video/mp4".into(),
        bytes: vec![0x42; len],
    }
}

fn pdf(name: &str) -> IncomingFile {
    IncomingFile {
        file_name: name.into(),
        mime_type: "application/pdf".into(),
        bytes: b"%PDF-1.4 test".to_vec(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_inspection_round_trip() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;
    assert!(api.auth_status().await.unwrap());

    let mut inspection = InspectionClient::new(api, MAX_VIDEO_BYTES);
    inspection
        .add_reference_link("https://standards.example/oisd-137")
        .unwrap();
    let skipped = inspection
        .upload_assets(
            video(256),
            vec![
                pdf("OISD-STD-137.pdf"),
                IncomingFile {
                    file_name: "photo.jpg".into(),
                    mime_type: "image/jpeg".into(),
                    bytes: vec![1, 2, 3],
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(skipped, vec!["photo.jpg".to_string()]);
    assert_eq!(inspection.flow().state(), FlowState::ReadyToAnalyze);
    assert_eq!(inspection.flow().references().len(), 1);

    let start = inspection.analyze(|| panic!("references were given")).await.unwrap();
    assert!(matches!(start, AnalysisStart::Started(_)));
    assert_eq!(inspection.flow().state(), FlowState::Completed);
    assert_eq!(srv.model.deletes.load(Ordering::SeqCst), 1);

    let result = inspection.flow().result().unwrap().clone();
    assert_eq!(result.findings.len(), 2);
    assert_eq!(result.findings[0].tag_number, "20-FV-2300");
    assert_eq!(result.findings[1].tag_number, "Near Unit 3");

    let id = inspection.save().await.unwrap();
    assert_eq!(inspection.flow().report_id(), Some(id.as_str()));

    let api = inspection.api();
    let reports = api.list_reports().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, id);
    assert_eq!(reports[0].created_by, USERNAME);
    assert_eq!(reports[0].video_file_name, "walkdown.mp4");
    assert_eq!(reports[0].reference_file_names, vec!["OISD-STD-137.pdf".to_string()]);
    assert_eq!(
        reports[0].reference_links,
        vec!["https://standards.example/oisd-137".to_string()]
    );

    let report = api.get_report(&id).await.unwrap();
    assert_eq!(report.result, result);

    let md = api.export_report(&id, ExportFormat::Markdown).await.unwrap();
    assert!(md.contains("Refinery Instrumentation Inspection Report"));
    assert!(md.find("20-FV-2300").unwrap() < md.find("Near Unit 3").unwrap());

    api.delete_report(&id).await.unwrap();
    assert!(matches!(
        api.delete_report(&id).await,
        Err(InspectError::NotFound { .. })
    ));
    assert!(matches!(
        api.get_report(&id).await,
        Err(InspectError::NotFound { .. })
    ));

    api.logout().await.unwrap();
    api.logout().await.unwrap();
    assert!(!api.auth_status().await.unwrap());
}

#[tokio::test]
async fn test_invalid_login_is_not_a_network_error() {
    let srv = TestServer::start(TWO_FINDINGS).await;

    let api = ApiClient::new(&srv.base_url).unwrap();
    let err = api.login(USERNAME, "wrong").await.unwrap_err();
    assert_eq!(err, InspectError::InvalidCredentials);
    assert!(!api.has_session_cookie());

    let unreachable = ApiClient::new(&format!("http://127.0.0.1:{}", find_free_port())).unwrap();
    let err = unreachable.login(USERNAME, PASSWORD).await.unwrap_err();
    assert!(matches!(err, InspectError::Network(_)));
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("{}/api/reports", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "unauthorized");

    let form = reqwest::multipart::Form::new().part(
        "video",
        reqwest::multipart::Part::bytes(vec![0u8; 64])
            .file_name("v.mp4")
            .mime_str("video/mp4")
            .unwrap(),
    );
    let resp = http
        .post(format!("{}/api/upload-video", srv.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(count_files(&srv.uploads().join("videos")), 0);

    // A forged cookie counts as no cookie.
    let resp = http
        .get(format!("{}/api/auth/status", srv.base_url))
        .header("Cookie", "refinery_eye_session=abc.def")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn test_oversized_video_is_rejected_without_storing() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;

    let err = api
        .upload_video(video(MAX_VIDEO_BYTES as usize + 1))
        .await
        .unwrap_err();
    assert!(
        matches!(err, InspectError::FileTooLarge { limit, .. } if limit == MAX_VIDEO_BYTES),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(count_files(&srv.uploads().join("videos")), 0);

    // Refused on the client before any request.
    let mut inspection = InspectionClient::new(api, MAX_VIDEO_BYTES);
    let err = inspection
        .upload_assets(video(MAX_VIDEO_BYTES as usize + 1), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, InspectError::FileTooLarge { .. }));
    assert_eq!(inspection.flow().state(), FlowState::Idle);
}

#[tokio::test]
async fn test_missing_video_is_reported_specifically() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;

    let err = api.analyze("", &[], &[]).await.unwrap_err();
    assert_eq!(err, InspectError::MissingVideo);
    assert_eq!(srv.model.generates.load(Ordering::SeqCst), 0);

    let err = api
        .save_report(&refinery_eye_core::models::NewReport {
            video_locator: String::new(),
            video_file_name: String::new(),
            reference_locators: vec![],
            reference_file_names: vec![],
            reference_links: vec![],
            result: refinery_eye_core::models::AnalysisResult {
                summary: None,
                findings: vec![],
            },
        })
        .await
        .unwrap_err();
    assert_eq!(err, InspectError::MissingVideo);
    assert!(api.list_reports().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_logout_resets_flow_and_session() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;

    let mut inspection = InspectionClient::new(api, MAX_VIDEO_BYTES);
    inspection.upload_assets(video(32), vec![]).await.unwrap();
    assert_eq!(inspection.flow().state(), FlowState::ReadyToAnalyze);

    inspection.logout().await.unwrap();
    assert_eq!(inspection.flow().state(), FlowState::Idle);
    assert!(inspection.flow().video().is_none());
    assert!(matches!(
        inspection.api().list_reports().await,
        Err(InspectError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_declined_confirmation_makes_no_model_call() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;

    let mut inspection = InspectionClient::new(api, MAX_VIDEO_BYTES);
    inspection.upload_assets(video(32), vec![]).await.unwrap();

    let start = inspection.analyze(|| false).await.unwrap();
    assert_eq!(start, AnalysisStart::Declined);
    assert_eq!(inspection.flow().state(), FlowState::ReadyToAnalyze);
    assert_eq!(srv.model.generates.load(Ordering::SeqCst), 0);

    let start = inspection.analyze(|| true).await.unwrap();
    assert!(matches!(start, AnalysisStart::Started(_)));
    assert_eq!(srv.model.generates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_model_output_is_a_distinct_error() {
    let srv = TestServer::start(r#"{"inspection_report": [{"tag_number": "X"}]}"#).await;
    let api = srv.logged_in().await;

    let mut inspection = InspectionClient::new(api, MAX_VIDEO_BYTES);
    inspection.upload_assets(video(32), vec![]).await.unwrap();
    let err = inspection.analyze(|| true).await.unwrap_err();
    assert!(matches!(err, InspectError::MalformedModelOutput { .. }));
    assert!(!err.to_string().contains("tag_number"));
    assert_eq!(inspection.flow().state(), FlowState::Error);
    assert!(inspection.flow().result().is_none());
    assert_eq!(srv.model.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stored_content_is_served_to_sessions() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;
    let asset = api.upload_video(video(100)).await.unwrap();
    assert!(asset.locator.starts_with("/api/content/videos/"));

    let http = reqwest::Client::new();
    let url = format!("{}{}", srv.base_url, asset.locator);
    let resp = http.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    // Reuse the session through a fresh login to read the cookie.
    let login = http
        .post(format!("{}/api/login", srv.base_url))
        .json(&serde_json::json!({ "username": USERNAME, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    let cookie = login
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    let resp = http.get(&url).header("Cookie", cookie).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp4");
    assert_eq!(resp.bytes().await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_references_added_after_video_skip_confirmation() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let api = srv.logged_in().await;

    let mut inspection = InspectionClient::new(api, MAX_VIDEO_BYTES);
    inspection.upload_assets(video(32), vec![]).await.unwrap();
    assert_eq!(inspection.flow().state(), FlowState::ReadyToAnalyze);

    let skipped = inspection
        .add_references(vec![pdf("oisd-137.pdf"), pdf("oisd-118.pdf")])
        .await
        .unwrap();
    assert!(skipped.is_empty());
    assert_eq!(inspection.flow().references().len(), 2);
    assert_eq!(count_files(&srv.uploads().join("references")), 2);

    let removed = inspection.remove_reference(1).unwrap();
    assert_eq!(removed.original_name, "oisd-118.pdf");
    inspection.add_reference_link("https://example.com/std").unwrap();
    assert_eq!(inspection.remove_reference_link(0).unwrap(), "https://example.com/std");

    let start = inspection
        .analyze(|| panic!("confirmation asked despite a reference document"))
        .await
        .unwrap();
    assert!(matches!(start, AnalysisStart::Started(_)));
    assert_eq!(inspection.flow().state(), FlowState::Completed);

    // Still editable once analysis has finished.
    inspection.add_references(vec![pdf("api-570.pdf")]).await.unwrap();
    assert_eq!(inspection.flow().references().len(), 2);
}

fn write_video(dir: &Path, len: usize) -> std::path::PathBuf {
    let path = dir.join("walkdown.mp4");
    std::fs::write(&path, vec![0x42; len]).unwrap();
    path
}

#[tokio::test]
async fn test_declined_inspection_still_logs_out() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let video_path = write_video(srv.tmp.path(), 32);
    let opts = InspectOptions {
        server: &srv.base_url,
        username: USERNAME,
        password: PASSWORD,
        video: &video_path,
        references: &[],
        links: &[],
        max_video_bytes: MAX_VIDEO_BYTES,
        assume_yes: false,
    };

    let mut inspection = InspectionClient::new(srv.logged_in().await, MAX_VIDEO_BYTES);
    let saved = inspect_and_logout(&mut inspection, &opts, || false).await.unwrap();

    assert_eq!(saved, None);
    assert_eq!(srv.model.generates.load(Ordering::SeqCst), 0);
    assert_eq!(inspection.flow().state(), FlowState::Idle);
    assert!(!inspection.api().has_session_cookie());
    assert!(!inspection.api().auth_status().await.unwrap());
}

#[tokio::test]
async fn test_failed_inspection_still_logs_out() {
    let srv = TestServer::start(TWO_FINDINGS).await;
    let video_path = write_video(srv.tmp.path(), MAX_VIDEO_BYTES as usize + 1);
    let opts = InspectOptions {
        server: &srv.base_url,
        username: USERNAME,
        password: PASSWORD,
        video: &video_path,
        references: &[],
        links: &[],
        max_video_bytes: MAX_VIDEO_BYTES,
        assume_yes: true,
    };

    let mut inspection = InspectionClient::new(srv.logged_in().await, MAX_VIDEO_BYTES);
    let err = inspect_and_logout(&mut inspection, &opts, || true)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<InspectError>(),
        Some(InspectError::FileTooLarge { .. })
    ));
    assert!(!inspection.api().has_session_cookie());
    assert!(matches!(
        inspection.api().list_reports().await,
        Err(InspectError::Unauthorized)
    ));
}
