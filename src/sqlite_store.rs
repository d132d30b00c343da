//! SQLite-backed [`ReportStore`].
//!
//! One row per report. Arrays and the analysis result are stored as JSON
//! text so findings keep their order exactly as the model returned them.
//! A monotonically increasing `seq` column breaks `created_at` ties so the
//! later insertion lists first.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use refinery_eye_core::models::{AnalysisResult, NewReport, Report};
use refinery_eye_core::store::ReportStore;
use refinery_eye_core::{InspectError, Result};

use crate::migrate;

pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the report database at `path` in WAL mode and bring its schema
    /// up to date. The file and its parent directory are created if missing.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate::apply(&pool).await?;
        tracing::debug!(path = %path.display(), "report database open");
        Ok(Self::new(pool))
    }

    /// Wait for in-flight queries and close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_err(e: sqlx::Error) -> InspectError {
    InspectError::io(format!("report database: {}", e))
}

fn json_err(e: serde_json::Error) -> InspectError {
    InspectError::io(format!("report encoding: {}", e))
}

fn row_to_report(row: &SqliteRow) -> Result<Report> {
    let decode_list = |column: &str| -> Result<Vec<String>> {
        let raw: String = row.try_get(column).map_err(db_err)?;
        serde_json::from_str(&raw).map_err(json_err)
    };
    let result_raw: String = row.try_get("result_json").map_err(db_err)?;
    let result: AnalysisResult = serde_json::from_str(&result_raw).map_err(json_err)?;
    let micros: i64 = row.try_get("created_at").map_err(db_err)?;
    let created_at = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| InspectError::io(format!("invalid created_at value {}", micros)))?;

    Ok(Report {
        id: row.try_get("id").map_err(db_err)?,
        video_locator: row.try_get("video_locator").map_err(db_err)?,
        video_file_name: row.try_get("video_file_name").map_err(db_err)?,
        reference_locators: decode_list("reference_locators_json")?,
        reference_file_names: decode_list("reference_file_names_json")?,
        reference_links: decode_list("reference_links_json")?,
        result,
        created_at,
        created_by: row.try_get("created_by").map_err(db_err)?,
    })
}

/// Current time truncated to the microsecond precision the table keeps.
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn append(&self, report: NewReport, created_by: &str) -> Result<Report> {
        let report = Report::from_new(report, created_by, now_micros());

        let refs = serde_json::to_string(&report.reference_locators).map_err(json_err)?;
        let names = serde_json::to_string(&report.reference_file_names).map_err(json_err)?;
        let links = serde_json::to_string(&report.reference_links).map_err(json_err)?;
        let result = serde_json::to_string(&report.result).map_err(json_err)?;

        sqlx::query(
            r#"
            INSERT INTO reports (id, seq, video_locator, video_file_name,
                                 reference_locators_json, reference_file_names_json,
                                 reference_links_json, result_json, created_at, created_by)
            VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM reports), ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.video_locator)
        .bind(&report.video_file_name)
        .bind(&refs)
        .bind(&names)
        .bind(&links)
        .bind(&result)
        .bind(report.created_at.timestamp_micros())
        .bind(&report.created_by)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(report)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Report>> {
        let rows = sqlx::query("SELECT * FROM reports ORDER BY created_at DESC, seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(row_to_report).collect()
    }

    async fn get(&self, id: &str) -> Result<Report> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| InspectError::not_found("report", id))?;

        row_to_report(&row)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if done.rows_affected() == 0 {
            return Err(InspectError::not_found("report", id));
        }
        Ok(())
    }
}
