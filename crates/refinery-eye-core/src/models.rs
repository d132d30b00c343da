//! Core data models used throughout Refinery Eye.
//!
//! These types represent the uploaded assets, model findings, and persisted
//! reports that flow through the upload → analyze → save pipeline. All
//! API-facing types serialize with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role an uploaded file plays in an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetRole {
    Video,
    Reference,
}

impl AssetRole {
    /// Directory (or key prefix) the blob backends file this role under.
    pub fn dir(&self) -> &'static str {
        match self {
            AssetRole::Video => "videos",
            AssetRole::Reference => "references",
        }
    }
}

/// A file persisted by a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedAsset {
    /// Opaque, independently fetchable URL or path.
    pub locator: String,
    /// Backend key (`videos/...` or `references/...`).
    pub storage_path: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Bytes read back from a blob store.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Severity of a single finding.
///
/// The three-level scale (Low/Medium/High) some model schemas emit is a
/// strict subset of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            "Critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// One detected fault or observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionFinding {
    /// 1-based position in the model response.
    pub serial_no: u32,
    /// `MM:SS` offset into the video.
    pub timestamp: String,
    /// Equipment tag, or a `Near <location>` hint when no tag is visible.
    pub tag_number: String,
    pub equipment_type: String,
    pub fault_type: String,
    pub severity: Severity,
    pub corrective_action: String,
    pub remarks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_reference: Option<String>,
}

/// Structured output of one analyze call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub findings: Vec<InspectionFinding>,
}

impl AnalysisResult {
    /// Count of findings at the given severity.
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

/// Input to [`ReportStore::append`](crate::store::ReportStore::append).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub video_locator: String,
    pub video_file_name: String,
    #[serde(default)]
    pub reference_locators: Vec<String>,
    #[serde(default)]
    pub reference_file_names: Vec<String>,
    #[serde(default)]
    pub reference_links: Vec<String>,
    pub result: AnalysisResult,
}

/// A persisted analysis. Append-only; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub video_locator: String,
    pub video_file_name: String,
    pub reference_locators: Vec<String>,
    pub reference_file_names: Vec<String>,
    pub reference_links: Vec<String>,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Report {
    /// Build a report from its inputs, assigning a fresh UUID.
    pub fn from_new(new: NewReport, created_by: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_locator: new.video_locator,
            video_file_name: new.video_file_name,
            reference_locators: new.reference_locators,
            reference_file_names: new.reference_file_names,
            reference_links: new.reference_links,
            result: new.result,
            created_at,
            created_by: created_by.to_string(),
        }
    }
}
