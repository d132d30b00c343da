use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::sqlite_store::SqliteReportStore;

/// Create the database and its schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let store = SqliteReportStore::open(&config.db.path).await?;
    store.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Array and result columns hold JSON text; created_at is unix microseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            video_locator TEXT NOT NULL,
            video_file_name TEXT NOT NULL,
            reference_locators_json TEXT NOT NULL DEFAULT '[]',
            reference_file_names_json TEXT NOT NULL DEFAULT '[]',
            reference_links_json TEXT NOT NULL DEFAULT '[]',
            result_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            created_by TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reports_created_at ON reports(created_at DESC, seq DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
