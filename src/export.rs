//! Downloadable report documents.
//!
//! Two formats are produced from a stored [`Report`]:
//!
//! | Format | Content type | Use |
//! |--------|--------------|-----|
//! | `markdown` | `text/markdown` | Human-readable record with a findings table |
//! | `json` | `application/json` | The stored report, pretty-printed |
//!
//! Findings are rendered in stored order.

use anyhow::{bail, Result};
use std::path::Path;
use std::str::FromStr;

use refinery_eye_core::models::{Report, Severity};

pub const REPORT_TITLE: &str = "Refinery Instrumentation Inspection Report";
pub const REPORT_FOOTER: &str = "RefineryEye AI - Confidential Maintenance Record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!(
                "unknown export format '{}'; expected markdown or json",
                other
            )),
        }
    }
}

/// A rendered document ready to be written or served.
#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: String,
}

pub fn render(report: &Report, format: ExportFormat) -> Result<ExportDocument> {
    let body = match format {
        ExportFormat::Markdown => render_markdown(report),
        ExportFormat::Json => serde_json::to_string_pretty(report)?,
    };
    Ok(ExportDocument {
        file_name: format!(
            "Refinery_Inspection_Report_{}.{}",
            report.created_at.format("%Y%m%d_%H%M%S"),
            format.extension()
        ),
        content_type: format.content_type(),
        body,
    })
}

pub fn render_markdown(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", REPORT_TITLE));
    out.push_str(&format!(
        "Generated on: {}  \n",
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Inspector: {}  \n", report.created_by));
    out.push_str(&format!("Video: {}  \n", report.video_file_name));
    out.push_str(&format!("Report ID: {}\n\n", report.id));

    if report.reference_file_names.is_empty() {
        out.push_str("Reference PDFs: None provided\n\n");
    } else {
        out.push_str("Reference PDFs:\n\n");
        for name in &report.reference_file_names {
            out.push_str(&format!("- {}\n", name));
        }
        out.push('\n');
    }

    if !report.reference_links.is_empty() {
        out.push_str("Reference URLs:\n\n");
        for url in &report.reference_links {
            out.push_str(&format!("- {}\n", url));
        }
        out.push('\n');
    }

    if let Some(summary) = &report.result.summary {
        out.push_str("## Executive Summary\n\n");
        out.push_str(summary.trim());
        out.push_str("\n\n");
    }

    let result = &report.result;
    let counts: Vec<String> = Severity::ALL
        .iter()
        .map(|s| (s, result.count_by_severity(*s)))
        .filter(|(_, n)| *n > 0)
        .map(|(s, n)| format!("{} {}", n, s))
        .collect();
    out.push_str(&format!("## Findings ({})\n\n", result.findings.len()));
    if result.findings.is_empty() {
        out.push_str("No faults were identified.\n\n");
    } else {
        out.push_str(&format!("Severity breakdown: {}\n\n", counts.join(", ")));
        out.push_str("| # | Time | Tag No. | Equipment | Fault | Severity | Corrective Action | Remarks |\n");
        out.push_str("|---|------|---------|-----------|-------|----------|-------------------|---------|\n");
        for f in &result.findings {
            let mut remarks = cell(&f.remarks);
            if let Some(reference) = &f.standard_reference {
                remarks.push_str(&format!(" (Ref: {})", cell(reference)));
            }
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                f.serial_no,
                cell(&f.timestamp),
                cell(&f.tag_number),
                cell(&f.equipment_type),
                cell(&f.fault_type),
                f.severity,
                cell(&f.corrective_action),
                remarks
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!("---\n{}\n", REPORT_FOOTER));
    out
}

/// Escape a value for a single Markdown table cell.
fn cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string()
}

/// Write a rendered document to `output`, or to stdout when `None`.
pub fn write_document(doc: &ExportDocument, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if path.is_dir() {
                bail!("{} is a directory", path.display());
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &doc.body)?;
            eprintln!("Exported report to {}", path.display());
        }
        None => {
            println!("{}", doc.body);
        }
    }
    Ok(())
}
