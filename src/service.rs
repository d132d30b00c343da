//! Orchestration service: session-gated intake, analysis, and report keeping.
//!
//! Every state-changing operation takes a [`Session`] obtained from
//! [`SessionStore::require`], so an unauthenticated caller is turned away
//! before any blob, model, or database I/O happens.

use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;

use refinery_eye_core::flow::is_http_url;
use refinery_eye_core::models::{AnalysisResult, AssetRole, NewReport, Report, UploadedAsset};
use refinery_eye_core::store::{BlobStore, ReportStore};
use refinery_eye_core::{InspectError, Result};

use crate::config::UploadsConfig;
use crate::export::{self, ExportDocument, ExportFormat};
use crate::gateway::AnalysisGateway;
use crate::session::{Session, SessionStore};

/// Maximum number of reports returned by [`InspectionService::list_reports`].
pub const REPORT_LIST_LIMIT: usize = 50;

const PDF_MIME: &str = "application/pdf";

/// A file received from a client, fully buffered.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    /// Declared content type; empty when the client sent none.
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    /// Declared type, or a guess from the file name when the client sent a
    /// generic or empty one.
    pub fn effective_mime(&self) -> String {
        let declared = self.mime_type.trim();
        if declared.is_empty() || declared == "application/octet-stream" {
            mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        } else {
            declared.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceUpload {
    pub files: Vec<UploadedAsset>,
    /// Names of files that were not PDFs.
    pub skipped: Vec<String>,
}

pub struct InspectionService {
    sessions: Arc<SessionStore>,
    blobs: Arc<dyn BlobStore>,
    reports: Arc<dyn ReportStore>,
    gateway: Arc<AnalysisGateway>,
    limits: UploadsConfig,
}

impl InspectionService {
    pub fn new(
        sessions: Arc<SessionStore>,
        blobs: Arc<dyn BlobStore>,
        reports: Arc<dyn ReportStore>,
        gateway: Arc<AnalysisGateway>,
        limits: UploadsConfig,
    ) -> Self {
        Self {
            sessions,
            blobs,
            reports,
            gateway,
            limits,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn limits(&self) -> &UploadsConfig {
        &self.limits
    }

    /// Fails with `FileTooLarge` when `size` exceeds the video limit.
    pub fn check_video_size(&self, size: u64) -> Result<()> {
        if size > self.limits.max_video_bytes {
            return Err(InspectError::FileTooLarge {
                size,
                limit: self.limits.max_video_bytes,
            });
        }
        Ok(())
    }

    pub async fn upload_video(&self, _session: &Session, file: IncomingFile) -> Result<UploadedAsset> {
        self.check_video_size(file.bytes.len() as u64)?;
        if file.bytes.is_empty() {
            return Err(InspectError::bad_request("No video file provided"));
        }
        let mime_type = file.effective_mime();
        if !mime_type.starts_with("video/") {
            return Err(InspectError::UnsupportedMediaType(format!(
                "{} is {}, expected a video",
                file.file_name, mime_type
            )));
        }

        let asset = self
            .blobs
            .store(file.bytes, &file.file_name, &mime_type, AssetRole::Video)
            .await?;
        tracing::info!(
            backend = self.blobs.backend(),
            path = %asset.storage_path,
            size = asset.size,
            "video uploaded"
        );
        Ok(asset)
    }

    /// Store the PDFs among `files` concurrently; everything else is skipped.
    pub async fn upload_references(
        &self,
        _session: &Session,
        files: Vec<IncomingFile>,
    ) -> Result<ReferenceUpload> {
        if files.len() > self.limits.max_reference_files {
            return Err(InspectError::bad_request(format!(
                "At most {} reference files per upload",
                self.limits.max_reference_files
            )));
        }

        let (pdfs, others): (Vec<IncomingFile>, Vec<IncomingFile>) = files
            .into_iter()
            .partition(|f| f.effective_mime() == PDF_MIME);
        let skipped: Vec<String> = others.into_iter().map(|f| f.file_name).collect();
        if !skipped.is_empty() {
            tracing::info!(?skipped, "skipped non-PDF reference files");
        }

        let stored = try_join_all(pdfs.into_iter().map(|f| {
            let blobs = Arc::clone(&self.blobs);
            async move {
                blobs
                    .store(f.bytes, &f.file_name, PDF_MIME, AssetRole::Reference)
                    .await
            }
        }))
        .await?;

        tracing::info!(stored = stored.len(), "reference documents uploaded");
        Ok(ReferenceUpload {
            files: stored,
            skipped,
        })
    }

    pub async fn analyze(
        &self,
        _session: &Session,
        video_locator: &str,
        reference_locators: &[String],
        reference_links: &[String],
    ) -> Result<AnalysisResult> {
        if let Some(bad) = reference_links.iter().find(|l| !is_http_url(l.trim())) {
            return Err(InspectError::bad_request(format!(
                "Invalid reference URL: {}",
                bad
            )));
        }
        let links: Vec<String> = reference_links.iter().map(|l| l.trim().to_string()).collect();
        self.gateway
            .analyze(video_locator, reference_locators, &links)
            .await
    }

    pub async fn save_report(&self, session: &Session, report: NewReport) -> Result<Report> {
        if report.video_locator.trim().is_empty() {
            return Err(InspectError::MissingVideo);
        }
        let saved = self.reports.append(report, &session.username).await?;
        tracing::info!(
            id = %saved.id,
            findings = saved.result.findings.len(),
            "report saved"
        );
        Ok(saved)
    }

    pub async fn list_reports(&self, _session: &Session) -> Result<Vec<Report>> {
        self.reports.list_recent(REPORT_LIST_LIMIT).await
    }

    pub async fn get_report(&self, _session: &Session, id: &str) -> Result<Report> {
        self.reports.get(id).await
    }

    pub async fn delete_report(&self, _session: &Session, id: &str) -> Result<()> {
        self.reports.delete(id).await?;
        tracing::info!(id, "report deleted");
        Ok(())
    }

    pub async fn export_report(
        &self,
        _session: &Session,
        id: &str,
        format: ExportFormat,
    ) -> Result<ExportDocument> {
        let report = self.reports.get(id).await?;
        export::render(&report, format).map_err(|e| InspectError::io(e.to_string()))
    }
}
