//! Client-side inspection flow.
//!
//! [`InspectionFlow`] is the state machine an operator-facing client drives:
//!
//! ```text
//!            select_video            video_uploaded            begin_analysis
//!   Idle ─────────────────▶ Uploading ─────────────▶ ReadyToAnalyze ─────────▶ Analyzing
//!    ▲                          │                          ▲                        │
//!    │                          │ video_upload_failed      │ (declined confirm)     │ analysis_succeeded
//!    │ reset (any state)        ▼                          │                        ▼
//!    └──────────────────────  Error ◀──────────────────────┴─ analysis_failed ── Completed
//! ```
//!
//! The machine holds no I/O. The HTTP driver in `refinery_eye::client`
//! performs uploads and analysis and reports outcomes back through the
//! transition methods. Every rejected transition returns an error and
//! leaves the state untouched.

use serde::Serialize;

use crate::error::{InspectError, Result};
use crate::models::{AnalysisResult, UploadedAsset};

/// Default client-side ceiling for video uploads (100 MiB).
pub const DEFAULT_MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowState {
    Idle,
    Uploading,
    ReadyToAnalyze,
    Analyzing,
    Completed,
    Error,
}

/// Inputs for one analyze request, captured when analysis begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPlan {
    pub video_locator: String,
    pub reference_locators: Vec<String>,
    pub reference_links: Vec<String>,
}

/// Outcome of [`InspectionFlow::begin_analysis`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStart {
    /// The flow moved to `Analyzing`; issue the request described by the plan.
    Started(AnalysisPlan),
    /// No references were present and the operator declined to continue.
    Declined,
}

#[derive(Debug, Clone)]
pub struct InspectionFlow {
    state: FlowState,
    max_video_bytes: u64,
    video: Option<UploadedAsset>,
    references: Vec<UploadedAsset>,
    reference_links: Vec<String>,
    result: Option<AnalysisResult>,
    report_id: Option<String>,
    error: Option<String>,
    save_error: Option<String>,
}

impl Default for InspectionFlow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VIDEO_BYTES)
    }
}

impl InspectionFlow {
    pub fn new(max_video_bytes: u64) -> Self {
        Self {
            state: FlowState::Idle,
            max_video_bytes,
            video: None,
            references: Vec::new(),
            reference_links: Vec::new(),
            result: None,
            report_id: None,
            error: None,
            save_error: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn video(&self) -> Option<&UploadedAsset> {
        self.video.as_ref()
    }

    pub fn references(&self) -> &[UploadedAsset] {
        &self.references
    }

    pub fn reference_links(&self) -> &[String] {
        &self.reference_links
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn report_id(&self) -> Option<&str> {
        self.report_id.as_deref()
    }

    /// Message shown while in `Error`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Last failed save attempt, if the result has not been persisted.
    pub fn save_error(&self) -> Option<&str> {
        self.save_error.as_deref()
    }

    /// Operator picked a video of `size` bytes.
    ///
    /// Oversized files are rejected before anything else happens.
    pub fn select_video(&mut self, size: u64) -> Result<()> {
        if size > self.max_video_bytes {
            return Err(InspectError::FileTooLarge {
                size,
                limit: self.max_video_bytes,
            });
        }
        match self.state {
            FlowState::Idle | FlowState::ReadyToAnalyze | FlowState::Error => {
                self.state = FlowState::Uploading;
                self.video = None;
                self.error = None;
                Ok(())
            }
            other => Err(InspectError::invalid_state(format!(
                "cannot select a video while {:?}",
                other
            ))),
        }
    }

    pub fn video_uploaded(&mut self, asset: UploadedAsset) -> Result<()> {
        self.expect(FlowState::Uploading, "finish a video upload")?;
        self.video = Some(asset);
        self.state = FlowState::ReadyToAnalyze;
        Ok(())
    }

    pub fn video_upload_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect(FlowState::Uploading, "fail a video upload")?;
        self.error = Some(message.into());
        self.state = FlowState::Error;
        Ok(())
    }

    /// References may be changed in every state except `Analyzing`.
    pub fn can_edit_references(&self) -> bool {
        self.state != FlowState::Analyzing
    }

    pub fn add_reference(&mut self, asset: UploadedAsset) -> Result<()> {
        self.ensure_references_editable()?;
        self.references.push(asset);
        Ok(())
    }

    pub fn remove_reference(&mut self, index: usize) -> Result<UploadedAsset> {
        self.ensure_references_editable()?;
        if index >= self.references.len() {
            return Err(InspectError::bad_request(format!(
                "no reference document at position {}",
                index
            )));
        }
        Ok(self.references.remove(index))
    }

    /// Cite a standard by URL. Must be absolute http(s) and not a duplicate.
    pub fn add_reference_link(&mut self, url: &str) -> Result<()> {
        self.ensure_references_editable()?;
        let url = url.trim();
        if !is_http_url(url) {
            return Err(InspectError::bad_request(
                "Please enter a valid URL including http:// or https://",
            ));
        }
        if self.reference_links.iter().any(|u| u == url) {
            return Err(InspectError::bad_request("This URL has already been added."));
        }
        self.reference_links.push(url.to_string());
        Ok(())
    }

    pub fn remove_reference_link(&mut self, index: usize) -> Result<String> {
        self.ensure_references_editable()?;
        if index >= self.reference_links.len() {
            return Err(InspectError::bad_request(format!(
                "no reference URL at position {}",
                index
            )));
        }
        Ok(self.reference_links.remove(index))
    }

    /// Start analysis from `ReadyToAnalyze`.
    ///
    /// With no documents and no links, `confirm` is asked whether to proceed
    /// on general best practices only. Declining leaves the flow in
    /// `ReadyToAnalyze`.
    pub fn begin_analysis(&mut self, confirm: impl FnOnce() -> bool) -> Result<AnalysisStart> {
        self.expect(FlowState::ReadyToAnalyze, "start analysis")?;
        let video_locator = match &self.video {
            Some(v) if !v.locator.is_empty() => v.locator.clone(),
            _ => return Err(InspectError::MissingVideo),
        };
        if self.references.is_empty() && self.reference_links.is_empty() && !confirm() {
            return Ok(AnalysisStart::Declined);
        }
        self.state = FlowState::Analyzing;
        self.error = None;
        Ok(AnalysisStart::Started(AnalysisPlan {
            video_locator,
            reference_locators: self.references.iter().map(|r| r.locator.clone()).collect(),
            reference_links: self.reference_links.clone(),
        }))
    }

    pub fn analysis_succeeded(&mut self, result: AnalysisResult) -> Result<()> {
        self.expect(FlowState::Analyzing, "complete analysis")?;
        self.result = Some(result);
        self.report_id = None;
        self.save_error = None;
        self.state = FlowState::Completed;
        Ok(())
    }

    pub fn analysis_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect(FlowState::Analyzing, "fail analysis")?;
        self.error = Some(message.into());
        self.state = FlowState::Error;
        Ok(())
    }

    pub fn report_saved(&mut self, id: impl Into<String>) -> Result<()> {
        self.expect(FlowState::Completed, "record a saved report")?;
        self.report_id = Some(id.into());
        self.save_error = None;
        Ok(())
    }

    /// The result stays in memory so the save can be retried or exported.
    pub fn save_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect(FlowState::Completed, "record a failed save")?;
        self.save_error = Some(message.into());
        Ok(())
    }

    /// Clear all in-memory state. Persisted blobs and reports are untouched.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_video_bytes);
    }

    fn expect(&self, wanted: FlowState, action: &str) -> Result<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(InspectError::invalid_state(format!(
                "cannot {} while {:?}",
                action, self.state
            )))
        }
    }

    fn ensure_references_editable(&self) -> Result<()> {
        if self.can_edit_references() {
            Ok(())
        } else {
            Err(InspectError::invalid_state(
                "references cannot change while analysis is running",
            ))
        }
    }
}

/// Absolute `http://` or `https://` URL with a non-empty host and no whitespace.
pub fn is_http_url(url: &str) -> bool {
    let rest = match url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty() && !url.chars().any(char::is_whitespace)
}
