//! `reye reports` subcommands.
//!
//! These work directly against the report database, so an operator can
//! inspect or clean up saved reports on the host without a running server.

use anyhow::Result;
use std::path::Path;

use refinery_eye_core::models::{Report, Severity};
use refinery_eye_core::store::ReportStore;

use crate::config::Config;
use crate::export::{self, ExportFormat};
use crate::sqlite_store::SqliteReportStore;

async fn open_store(config: &Config) -> Result<SqliteReportStore> {
    SqliteReportStore::open(&config.db.path).await
}

pub async fn run_list(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let reports = store.list_recent(limit).await?;
    store.close().await;

    if reports.is_empty() {
        println!("No reports saved.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<19}  {:>8}  {:>8}  VIDEO",
        "ID", "CREATED (UTC)", "FINDINGS", "CRITICAL"
    );
    for r in &reports {
        println!(
            "{:<36}  {:<19}  {:>8}  {:>8}  {}",
            r.id,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.result.findings.len(),
            r.result.count_by_severity(Severity::Critical),
            r.video_file_name
        );
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let report = store.get(id).await;
    store.close().await;
    print_report(&report?);
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let deleted = store.delete(id).await;
    store.close().await;
    deleted?;
    println!("Deleted report {}", id);
    Ok(())
}

pub async fn run_export(
    config: &Config,
    id: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let store = open_store(config).await?;
    let report = store.get(id).await;
    store.close().await;
    let doc = export::render(&report?, format)?;
    export::write_document(&doc, output)
}

fn print_report(report: &Report) {
    println!("--- Report ---");
    println!("id:          {}", report.id);
    println!("created_at:  {}", report.created_at.to_rfc3339());
    println!("created_by:  {}", report.created_by);
    println!("video:       {} ({})", report.video_file_name, report.video_locator);
    for name in &report.reference_file_names {
        println!("reference:   {}", name);
    }
    for url in &report.reference_links {
        println!("link:        {}", url);
    }
    println!();

    if let Some(summary) = &report.result.summary {
        println!("--- Summary ---");
        println!("{}", summary);
        println!();
    }

    println!("--- Findings ({}) ---", report.result.findings.len());
    for f in &report.result.findings {
        println!(
            "[{}] {} {} | {} | {} | {}",
            f.serial_no, f.timestamp, f.tag_number, f.equipment_type, f.fault_type, f.severity
        );
        println!("    action:  {}", f.corrective_action);
        if !f.remarks.is_empty() {
            println!("    remarks: {}", f.remarks);
        }
    }
}
