//! C1 — content-addressed file storage for uploaded documents, with a
//! manifest mapping blob id to metadata.
//!
//! The manifest is re-read on every operation; callers never see a stale
//! in-memory copy.

use crate::error::BlobError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobInfo {
    pub blob_id: String,
    pub original_filename: String,
    pub file_extension: String,
    pub size_bytes: u64,
    pub created_at: String,
    pub storage_path: String,
    pub content_hash: String,
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct BlobStore {
    storage_path: PathBuf,
}

impl BlobStore {
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let storage_path = storage_path.into();
        tokio::fs::create_dir_all(&storage_path).await?;
        Ok(Self { storage_path })
    }

    fn manifest_path(&self) -> PathBuf {
        self.storage_path.join("_manifest.json")
    }

    async fn load_manifest(&self) -> HashMap<String, BlobInfo> {
        match tokio::fs::read_to_string(self.manifest_path()).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    async fn save_manifest(&self, manifest: &HashMap<String, BlobInfo>) -> Result<(), BlobError> {
        let content = serde_json::to_string_pretty(manifest)
            .map_err(|e| BlobError::ManifestCorrupt(e.to_string()))?;
        let tmp_path = self.manifest_path().with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, self.manifest_path()).await?;
        Ok(())
    }

    /// Allocate a fresh blob id, write the file, then append the manifest
    /// entry atomically. Returns the id only after both writes succeed.
    ///
    /// If a blob with identical content already exists, its id is returned
    /// instead of writing a duplicate copy.
    pub async fn save(
        &self,
        file_content: &[u8],
        original_filename: &str,
    ) -> Result<String, BlobError> {
        let hash = content_hash(file_content);
        let mut manifest = self.load_manifest().await;

        if let Some(existing) = manifest.values().find(|e| e.content_hash == hash) {
            return Ok(existing.blob_id.clone());
        }

        let blob_id = format!("blob_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let file_extension = Path::new(original_filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let storage_filename = format!("{blob_id}{file_extension}");
        let storage_path = self.storage_path.join(&storage_filename);
        tokio::fs::write(&storage_path, file_content).await?;

        let info = BlobInfo {
            blob_id: blob_id.clone(),
            original_filename: original_filename.to_string(),
            file_extension,
            size_bytes: file_content.len() as u64,
            created_at: Utc::now().to_rfc3339(),
            storage_path: storage_path.to_string_lossy().to_string(),
            content_hash: hash,
        };

        manifest.insert(blob_id.clone(), info);
        self.save_manifest(&manifest).await?;

        info!(blob_id = %blob_id, original_filename, "blob saved");
        Ok(blob_id)
    }

    /// Manifest lookup followed by an existence check. A manifest entry with
    /// no backing file is reported as not found — self-healing is the
    /// caller's responsibility.
    pub async fn get(&self, blob_id: &str) -> Result<PathBuf, BlobError> {
        let manifest = self.load_manifest().await;
        let entry = manifest
            .get(blob_id)
            .ok_or_else(|| BlobError::NotFound(blob_id.to_string()))?;
        let path = PathBuf::from(&entry.storage_path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BlobError::NotFound(blob_id.to_string()));
        }
        Ok(path)
    }

    pub async fn get_info(&self, blob_id: &str) -> Result<BlobInfo, BlobError> {
        let manifest = self.load_manifest().await;
        manifest
            .get(blob_id)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(blob_id.to_string()))
    }

    pub async fn list(&self) -> Vec<BlobInfo> {
        self.load_manifest().await.into_values().collect()
    }

    /// Remove the file if present, then remove the manifest entry. Safe to
    /// retry: a missing file or a missing manifest entry are not errors.
    pub async fn delete(&self, blob_id: &str) -> Result<bool, BlobError> {
        let mut manifest = self.load_manifest().await;
        let Some(entry) = manifest.get(blob_id) else {
            return Ok(false);
        };
        let path = PathBuf::from(&entry.storage_path);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await?;
        }
        manifest.remove(blob_id);
        self.save_manifest(&manifest).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_get_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        let id = store.save(b"hello world", "notes.txt").await.unwrap();
        let path = store.get(&id).await.unwrap();
        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes, b"hello world");

        let info = store.get_info(&id).await.unwrap();
        assert_eq!(info.original_filename, "notes.txt");
        assert_eq!(info.file_extension, ".txt");
    }

    #[tokio::test]
    async fn get_unknown_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        assert!(matches!(
            store.get("blob_doesnotexist").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let id = store.save(b"data", "a.md").await.unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(matches!(store.get(&id).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn save_deduplicates_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let id1 = store.save(b"same bytes", "a.txt").await.unwrap();
        let id2 = store.save(b"same bytes", "b.txt").await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn list_returns_all_saved_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        store.save(b"one", "a.txt").await.unwrap();
        store.save(b"two", "b.txt").await.unwrap();
        assert_eq!(store.list().await.len(), 2);
    }
}
