//! In-memory [`BlobStore`] and [`ReportStore`] implementations for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Blob writes are counted so tests can assert that rejected uploads never
//! reached the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{InspectError, Result};
use crate::models::{AssetRole, Blob, NewReport, Report, UploadedAsset};

use super::{unique_object_name, BlobStore, ReportStore};

const MEMORY_SCHEME: &str = "memory://";

/// In-memory blob store. Locators look like `memory://videos/<name>`.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Blob>>,
    writes: AtomicUsize,
    counter: AtomicU32,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            counter: AtomicU32::new(0),
        }
    }

    /// Number of successful `store` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn store(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        mime_type: &str,
        role: AssetRole,
    ) -> Result<UploadedAsset> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let name = unique_object_name(original_name, Utc::now().timestamp_millis(), n);
        let storage_path = format!("{}/{}", role.dir(), name);
        let size = bytes.len() as u64;

        self.blobs.write().unwrap().insert(
            storage_path.clone(),
            Blob {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(UploadedAsset {
            locator: format!("{}{}", MEMORY_SCHEME, storage_path),
            storage_path,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size,
        })
    }

    async fn fetch(&self, locator: &str) -> Result<Blob> {
        let key = locator.strip_prefix(MEMORY_SCHEME).unwrap_or(locator);
        self.blobs
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| InspectError::not_found("blob", locator))
    }

    async fn delete(&self, storage_path: &str) -> Result<()> {
        self.blobs.write().unwrap().remove(storage_path);
        Ok(())
    }
}

/// In-memory report store. Insertion order breaks `created_at` ties.
pub struct InMemoryReportStore {
    reports: RwLock<Vec<Report>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(Vec::new()),
        }
    }

    /// Insert a fully-formed report, keeping its `created_at`.
    pub fn insert(&self, report: Report) {
        self.reports.write().unwrap().push(report);
    }
}

impl Default for InMemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn append(&self, report: NewReport, created_by: &str) -> Result<Report> {
        let report = Report::from_new(report, created_by, Utc::now());
        self.reports.write().unwrap().push(report.clone());
        Ok(report)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Report>> {
        let reports = self.reports.read().unwrap();
        let mut indexed: Vec<(usize, &Report)> = reports.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(indexed
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Report> {
        self.reports
            .read()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| InspectError::not_found("report", id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut reports = self.reports.write().unwrap();
        let before = reports.len();
        reports.retain(|r| r.id != id);
        if reports.len() == before {
            return Err(InspectError::not_found("report", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisResult;
    use chrono::{DateTime, TimeZone};

    fn report_at(video: &str, created_at: DateTime<Utc>) -> Report {
        let new = NewReport {
            video_locator: format!("memory://videos/{}", video),
            video_file_name: video.to_string(),
            reference_locators: vec![],
            reference_file_names: vec![],
            reference_links: vec![],
            result: AnalysisResult {
                summary: None,
                findings: vec![],
            },
        };
        Report::from_new(new, "inspector", created_at)
    }

    #[tokio::test]
    async fn list_recent_sorts_newest_first_for_any_insertion_order() {
        let store = InMemoryReportStore::new();
        let at = |minute| Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap();
        for (video, minute) in [("b.mp4", 20), ("d.mp4", 40), ("a.mp4", 10), ("c.mp4", 30)] {
            store.insert(report_at(video, at(minute)));
        }

        let names: Vec<String> = store
            .list_recent(50)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.video_file_name)
            .collect();
        assert_eq!(names, vec!["d.mp4", "c.mp4", "b.mp4", "a.mp4"]);

        let top = store.list_recent(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].video_file_name, "c.mp4");
    }

    #[tokio::test]
    async fn equal_timestamps_list_latest_insert_first() {
        let store = InMemoryReportStore::new();
        let same = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        store.insert(report_at("first.mp4", same));
        store.insert(report_at("second.mp4", same));

        let recent = store.list_recent(50).await.unwrap();
        assert_eq!(recent[0].video_file_name, "second.mp4");
        assert_eq!(recent[1].video_file_name, "first.mp4");
    }
}
