//! Local-directory [`BlobStore`].
//!
//! Files land under `<local_dir>/videos/` and `<local_dir>/references/`.
//! Locators are server-relative URLs, `/api/content/<storage_path>`, served
//! back by the `GET /api/content/{*path}` route. Any locator whose path
//! would leave the root directory resolves to `NotFound`.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use refinery_eye_core::models::{AssetRole, Blob, UploadedAsset};
use refinery_eye_core::store::{unique_object_name, BlobStore};
use refinery_eye_core::{InspectError, Result};

/// URL prefix of locators issued by this backend.
pub const CONTENT_PREFIX: &str = "/api/content/";

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path for a storage path, or `None` if it escapes the root.
    pub fn resolve(&self, storage_path: &str) -> Option<PathBuf> {
        let rel = Path::new(storage_path);
        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if clean.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(clean))
    }

    /// Read a stored file by storage path.
    pub async fn read(&self, storage_path: &str) -> Result<Blob> {
        let path = self
            .resolve(storage_path)
            .ok_or_else(|| InspectError::not_found("blob", storage_path))?;
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InspectError::not_found("blob", storage_path))
            }
            Err(e) => {
                return Err(InspectError::io(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Blob { bytes, mime_type })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn store(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        mime_type: &str,
        role: AssetRole,
    ) -> Result<UploadedAsset> {
        let dir = self.root.join(role.dir());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| InspectError::io(format!("failed to create {}: {}", dir.display(), e)))?;

        let name = unique_object_name(original_name, Utc::now().timestamp_millis(), rand::random());
        let abs_path = dir.join(&name);
        fs::write(&abs_path, &bytes)
            .await
            .map_err(|e| InspectError::io(format!("failed to write {}: {}", abs_path.display(), e)))?;

        let storage_path = format!("{}/{}", role.dir(), name);
        tracing::debug!(path = %abs_path.display(), size = bytes.len(), "stored blob");

        Ok(UploadedAsset {
            locator: format!("{}{}", CONTENT_PREFIX, storage_path),
            storage_path,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn fetch(&self, locator: &str) -> Result<Blob> {
        let storage_path = locator.strip_prefix(CONTENT_PREFIX).unwrap_or(locator);
        self.read(storage_path).await
    }

    async fn delete(&self, storage_path: &str) -> Result<()> {
        let Some(path) = self.resolve(storage_path) else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InspectError::io(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn store_then_fetch_by_locator() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        let asset = store
            .store(b"%PDF-1.4".to_vec(), "OISD-STD-137.pdf", "application/pdf", AssetRole::Reference)
            .await
            .unwrap();

        assert!(asset.locator.starts_with("/api/content/references/"));
        assert!(asset.storage_path.ends_with("-OISD-STD-137.pdf"));
        assert_eq!(asset.size, 8);

        let blob = store.fetch(&asset.locator).await.unwrap();
        assert_eq!(blob.bytes, b"%PDF-1.4");
        assert_eq!(blob.mime_type, "application/pdf");
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_paths() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        let a = store.store(vec![1], "walk.mp4", "video/mp4", AssetRole::Video).await.unwrap();
        let b = store.store(vec![2], "walk.mp4", "video/mp4", AssetRole::Video).await.unwrap();
        assert_ne!(a.storage_path, b.storage_path);
    }

    #[tokio::test]
    async fn traversal_and_missing_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path().join("uploads"));
        std::fs::write(tmp.path().join("secret.txt"), "x").unwrap();

        for locator in ["/api/content/../secret.txt", "/etc/passwd", "/api/content/videos/nope.mp4"] {
            let err = store.fetch(locator).await.unwrap_err();
            assert!(matches!(err, InspectError::NotFound { .. }), "{}: {:?}", locator, err);
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        let a = store.store(vec![1], "v.mp4", "video/mp4", AssetRole::Video).await.unwrap();
        store.delete(&a.storage_path).await.unwrap();
        store.delete(&a.storage_path).await.unwrap();
        assert!(store.fetch(&a.locator).await.is_err());
    }
}
