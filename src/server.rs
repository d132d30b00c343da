//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/api/login` | none | Open a session (sets the session cookie) |
//! | `POST` | `/api/logout` | none | Close the session (idempotent) |
//! | `GET`  | `/api/auth/status` | none | `{authenticated}` |
//! | `POST` | `/api/upload-video` | session | Multipart field `video` |
//! | `POST` | `/api/upload-references` | session | Multipart field `references` (repeatable) |
//! | `POST` | `/api/analyze` | session | Run the model over uploaded assets |
//! | `POST` | `/api/save-report` | session | Persist an analysis result |
//! | `GET`  | `/api/reports` | session | Newest 50 reports |
//! | `GET`  | `/api/reports/{id}` | session | One report |
//! | `DELETE` | `/api/reports/{id}` | session | Delete a report |
//! | `GET`  | `/api/reports/{id}/export` | session | `?format=markdown\|json` download |
//! | `GET`  | `/api/content/{*path}` | session | Bytes stored by the local backend |
//! | `GET`  | `/health` | none | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every non-2xx response carries
//!
//! ```json
//! { "error": "Video URL required", "code": "missing_video" }
//! ```
//!
//! with the status and code taken from [`InspectError`].

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use refinery_eye_core::models::{AnalysisResult, NewReport};
use refinery_eye_core::store::{BlobStore, ReportStore};
use refinery_eye_core::InspectError;

use crate::blob_fs::LocalBlobStore;
use crate::blob_s3::S3BlobStore;
use crate::config::Config;
use crate::export::ExportFormat;
use crate::gateway::{AnalysisGateway, ModelClient, PollSettings};
use crate::service::{IncomingFile, InspectionService};
use crate::session::{Session, SessionStore};
use crate::sqlite_store::SqliteReportStore;

/// Headroom above the video limit for multipart framing and other fields.
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<InspectionService>,
    /// Present when blobs live on local disk and are served from `/api/content`.
    content: Option<Arc<LocalBlobStore>>,
}

impl AppState {
    pub fn new(service: Arc<InspectionService>, content: Option<Arc<LocalBlobStore>>) -> Self {
        Self { service, content }
    }
}

/// Wire every component from configuration.
///
/// `model` replaces the Gemini client (tests inject a fake here). Without
/// it, the Gemini client is used when its API key is set.
pub async fn build_state(config: &Config, model: Option<Arc<dyn ModelClient>>) -> anyhow::Result<AppState> {
    let sessions = Arc::new(SessionStore::from_config(&config.auth)?);

    let (blobs, content): (Arc<dyn BlobStore>, Option<Arc<LocalBlobStore>>) =
        match config.storage.backend.as_str() {
            "s3" => {
                let s3 = config
                    .storage
                    .s3
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("[storage.s3] is missing"))?;
                let s3: Arc<dyn BlobStore> = Arc::new(S3BlobStore::from_config(s3)?);
                (s3, None)
            }
            _ => {
                let local = Arc::new(LocalBlobStore::new(&config.storage.local_dir));
                let blobs: Arc<dyn BlobStore> = local.clone();
                (blobs, Some(local))
            }
        };

    let reports: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::open(&config.db.path).await?);

    let gateway = match model {
        Some(model) => AnalysisGateway::new(
            blobs.clone(),
            Some(model),
            PollSettings::from_config(&config.gateway),
            config.gateway.temperature,
        ),
        None => AnalysisGateway::from_config(&config.gateway, blobs.clone())?,
    };

    tracing::info!(
        storage = blobs.backend(),
        model = %config.gateway.model,
        analysis_enabled = gateway.is_configured(),
        "components ready"
    );

    let service = InspectionService::new(
        sessions,
        blobs,
        reports,
        Arc::new(gateway),
        config.uploads.clone(),
    );
    Ok(AppState::new(Arc::new(service), content))
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.service.limits().max_video_bytes as usize + BODY_OVERHEAD_BYTES;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/auth/status", get(handle_auth_status))
        .route("/api/upload-video", post(handle_upload_video))
        .route("/api/upload-references", post(handle_upload_references))
        .route("/api/analyze", post(handle_analyze))
        .route("/api/save-report", post(handle_save_report))
        .route("/api/reports", get(handle_list_reports))
        .route(
            "/api/reports/{id}",
            get(handle_get_report).delete(handle_delete_report),
        )
        .route("/api/reports/{id}/export", get(handle_export_report))
        .route("/api/content/{*path}", get(handle_content))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_model(config, None).await
}

/// Like [`run_server`], with an explicit [`ModelClient`].
pub async fn run_server_with_model(
    config: &Config,
    model: Option<Arc<dyn ModelClient>>,
) -> anyhow::Result<()> {
    let state = build_state(config, model).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Refinery Eye listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl From<InspectError> for AppError {
    fn from(err: InspectError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        InspectError::bad_request(rejection.body_text()).into()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            code: if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                "file_too_large".to_string()
            } else {
                "bad_request".to_string()
            },
            message: err.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ Session helpers ============

fn session_id(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| state.service.sessions().session_from_cookie_header(raw))
}

fn require_session(state: &AppState, headers: &HeaderMap) -> ApiResult<Session> {
    let id = session_id(state, headers);
    Ok(state.service.sessions().require(id.as_deref())?)
}

// ============ Auth ============

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    let sessions = state.service.sessions();
    let session = sessions.login(&req.username, &req.password)?;
    Ok((
        [(header::SET_COOKIE, sessions.cookie_header(&session))],
        Json(json!({ "success": true, "message": "Login successful" })),
    )
        .into_response())
}

async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id(&state, &headers) {
        state.service.sessions().logout(&id);
    }
    (
        [(header::SET_COOKIE, SessionStore::clear_cookie_header())],
        Json(json!({ "success": true, "message": "Logged out" })),
    )
        .into_response()
}

async fn handle_auth_status(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let authenticated = session_id(&state, &headers)
        .map(|id| state.service.sessions().status(&id))
        .unwrap_or(false);
    Json(json!({ "authenticated": authenticated }))
}

// ============ Uploads ============

async fn handle_upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let limit = state.service.limits().max_video_bytes;

    let mut video: Option<IncomingFile> = None;
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("video") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("video.mp4").to_string();
        let mime_type = field.content_type().unwrap_or("").to_string();

        // Stop reading as soon as the limit is crossed.
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            let size = (bytes.len() + chunk.len()) as u64;
            state.service.check_video_size(size)?;
            bytes.extend_from_slice(&chunk);
        }
        video = Some(IncomingFile {
            file_name,
            mime_type,
            bytes,
        });
    }

    let video = video.ok_or_else(|| InspectError::bad_request("No video file provided"))?;
    tracing::debug!(file = %video.file_name, size = video.bytes.len(), limit, "video received");
    let asset = state.service.upload_video(&session, video).await?;

    Ok(Json(json!({
        "success": true,
        "url": asset.locator,
        "filename": asset.original_name,
        "storagePath": asset.storage_path,
    })))
}

async fn handle_upload_references(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let max_files = state.service.limits().max_reference_files;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("references") {
            continue;
        }
        if files.len() == max_files {
            return Err(InspectError::bad_request(format!(
                "At most {} reference files per upload",
                max_files
            ))
            .into());
        }
        let file_name = field.file_name().unwrap_or("reference.pdf").to_string();
        let mime_type = field.content_type().unwrap_or("").to_string();
        let bytes = field.bytes().await?.to_vec();
        files.push(IncomingFile {
            file_name,
            mime_type,
            bytes,
        });
    }

    let upload = state.service.upload_references(&session, files).await?;
    let files: Vec<Value> = upload
        .files
        .iter()
        .map(|f| {
            json!({
                "url": f.locator,
                "filename": f.original_name,
                "storagePath": f.storage_path,
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "files": files,
        "skipped": upload.skipped,
    })))
}

// ============ Analysis and reports ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    #[serde(default)]
    video_url: String,
    #[serde(default)]
    reference_urls: Vec<String>,
    /// Free-standing URLs cited to the model.
    #[serde(default)]
    reference_urls_list: Vec<String>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let Json(req) = body?;
    let result = state
        .service
        .analyze(
            &session,
            &req.video_url,
            &req.reference_urls,
            &req.reference_urls_list,
        )
        .await?;
    Ok(Json(json!({ "success": true, "result": result })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveReportRequest {
    #[serde(default)]
    video_url: String,
    #[serde(default)]
    video_file_name: String,
    #[serde(default)]
    reference_urls: Vec<String>,
    #[serde(default)]
    reference_file_names: Vec<String>,
    #[serde(default)]
    reference_links: Vec<String>,
    result: AnalysisResult,
}

async fn handle_save_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SaveReportRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let Json(req) = body?;
    let report = state
        .service
        .save_report(
            &session,
            NewReport {
                video_locator: req.video_url,
                video_file_name: req.video_file_name,
                reference_locators: req.reference_urls,
                reference_file_names: req.reference_file_names,
                reference_links: req.reference_links,
                result: req.result,
            },
        )
        .await?;
    Ok(Json(json!({ "success": true, "reportId": report.id })))
}

async fn handle_list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let reports = state.service.list_reports(&session).await?;
    Ok(Json(json!({ "success": true, "reports": reports })))
}

async fn handle_get_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let report = state.service.get_report(&session, &id).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn handle_delete_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    state.service.delete_report(&session, &id).await?;
    Ok(Json(json!({ "success": true, "message": "Report deleted" })))
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn handle_export_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let session = require_session(&state, &headers)?;
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("markdown")
        .parse()
        .map_err(InspectError::BadRequest)?;
    let doc = state.service.export_report(&session, &id, format).await?;

    let disposition = format!("attachment; filename=\"{}\"", doc.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, doc.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        doc.body,
    )
        .into_response())
}

// ============ Stored content ============

async fn handle_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    require_session(&state, &headers)?;
    let store = state
        .content
        .as_ref()
        .ok_or_else(|| InspectError::not_found("content", &path))?;
    let blob = store.read(&path).await?;
    Ok(([(header::CONTENT_TYPE, blob.mime_type)], blob.bytes).into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
