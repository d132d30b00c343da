//! Storage abstractions for Refinery Eye.
//!
//! [`BlobStore`] persists uploaded video/PDF bytes and hands back a
//! locator; [`ReportStore`] persists finished analyses. Both are
//! `Send + Sync` trait objects so the server can swap backends (local
//! directory, S3, SQLite, in-memory) from configuration.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AssetRole, Blob, NewReport, Report, UploadedAsset};

/// Persistence for uploaded files.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`store`](BlobStore::store) | Write bytes under a collision-resistant name |
/// | [`fetch`](BlobStore::fetch) | Read bytes back by locator |
/// | [`delete`](BlobStore::delete) | Remove bytes by storage path |
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs (`"local"`, `"s3"`, `"memory"`).
    fn backend(&self) -> &str;

    /// Persist `bytes` and return a locator usable with [`fetch`](BlobStore::fetch).
    async fn store(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        mime_type: &str,
        role: AssetRole,
    ) -> Result<UploadedAsset>;

    /// Read previously stored bytes. Unknown locators fail with `NotFound`.
    async fn fetch(&self, locator: &str) -> Result<Blob>;

    /// Remove stored bytes. Missing objects are not an error.
    async fn delete(&self, storage_path: &str) -> Result<()>;
}

/// Persistence for finished analyses. Reports are append-only.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Assign an id and timestamp, persist, and return the stored report.
    async fn append(&self, report: NewReport, created_by: &str) -> Result<Report>;

    /// Reports newest first by `created_at`, at most `limit`.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Report>>;

    async fn get(&self, id: &str) -> Result<Report>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Build a collision-resistant object name: `<millis>-<random>-<name>`.
///
/// The original name is reduced to its final path component and to
/// characters safe in both filesystem paths and URL paths.
pub fn unique_object_name(original_name: &str, millis: i64, random: u32) -> String {
    format!("{}-{:08x}-{}", millis, random, sanitize_file_name(original_name))
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
