//! Filesystem fallback store
//!
//! One JSON file per key under the namespace directory, named by the SHA-256
//! of the key so every key fits the platform's file name limit. The envelope
//! carries the original key. Writes go to a temporary file in the same
//! directory and are renamed into place, so a crash never leaves a truncated
//! entry behind.

use super::LocalFallbackStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tierstore_core::{Result, StorageError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    data: Value,
    saved_at: DateTime<Utc>,
}

pub struct FsFallbackStore {
    dir: PathBuf,
}

impl FsFallbackStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", hash_key(key)))
    }

    fn is_entry_file(path: &Path) -> bool {
        path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION)
    }

    async fn write_atomic(&self, key: &str, content: &[u8]) -> Result<()> {
        let write_err =
            |operation: &str, e: std::io::Error| StorageError::local_write(key, format!("{operation}: {e}"));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_err("create directory", e))?;

        let temp_path = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let written = async {
            let mut file = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| write_err("create temporary file", e))?;
            file.write_all(content)
                .await
                .map_err(|e| write_err("write temporary file", e))?;
            file.sync_all()
                .await
                .map_err(|e| write_err("sync temporary file", e))
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&temp_path, self.path_for(key)).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(write_err("rename into place", e));
        }
        Ok(())
    }

    async fn read_envelope(&self, path: &Path, key: &str) -> Result<Option<Envelope>> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::local_read(key, e.to_string())),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StorageError::decode(key, &e))
    }
}

#[async_trait]
impl LocalFallbackStore for FsFallbackStore {
    async fn save(&self, key: &str, data: &Value) -> Result<()> {
        let envelope = Envelope {
            key: key.to_string(),
            data: data.clone(),
            saved_at: Utc::now(),
        };
        let content = serde_json::to_vec(&envelope).map_err(|e| StorageError::encode(key, &e))?;
        self.write_atomic(key, &content).await?;
        debug!(key, dir = %self.dir.display(), "saved to local fallback");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let envelope = self.read_envelope(&self.path_for(key), key).await?;
        Ok(envelope
            .filter(|envelope| envelope.key == key)
            .map(|envelope| envelope.data))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::local_write(key, format!("remove: {e}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Value>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::local_read(prefix, e.to_string())),
        };

        let mut found = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(StorageError::local_read(prefix, e.to_string())),
            };
            let path = entry.path();
            if !Self::is_entry_file(&path) {
                continue;
            }
            match self.read_envelope(&path, prefix).await {
                Ok(Some(envelope)) if envelope.key.starts_with(prefix) => {
                    found.push((envelope.key, envelope.data));
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable local entry"),
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().map(|(_, data)| data).collect())
    }
}

/// Fixed-length file stem for `key`
fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn directory_is_created_lazily() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path().join("scenarios"));
        assert!(!store.dir().exists());
        assert_eq!(store.load("a").await.unwrap(), None);
        assert!(store.list("").await.unwrap().is_empty());

        store.save("a", &json!({"title": "X"})).await.unwrap();
        assert!(store.dir().exists());
        assert_eq!(store.load("a").await.unwrap(), Some(json!({"title": "X"})));
    }

    #[tokio::test]
    async fn keys_with_separators_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path());
        let key = "scenario:123/../../etc";

        store.save(key, &json!(1)).await.unwrap();
        assert_eq!(store.load(key).await.unwrap(), Some(json!(1)));
        assert!(store.path_for(key).starts_with(temp.path()));
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temporary_files() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path());
        store.save("a", &json!(1)).await.unwrap();
        store.save("a", &json!(2)).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(store.load("a").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path());
        store.save("a", &json!(1)).await.unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.load("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_skips_foreign_files() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path());
        store.save("scenario:2", &json!(2)).await.unwrap();
        store.save("scenario:1", &json!(1)).await.unwrap();
        store.save("progress:1", &json!(3)).await.unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(temp.path().join("zz.json"), "not an envelope").unwrap();

        let listed = store.list("scenario:").await.unwrap();
        assert_eq!(listed, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn longest_valid_key_round_trips() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path());
        let key = format!("scenario:{}", "x".repeat(tierstore_core::keys::MAX_KEY_LEN - 9));
        assert_eq!(key.len(), tierstore_core::keys::MAX_KEY_LEN);

        store.save(&key, &json!({"title": "X"})).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), Some(json!({"title": "X"})));
        assert_eq!(store.list("scenario:").await.unwrap(), vec![json!({"title": "X"})]);
        assert!(store.delete(&key).await.unwrap());
    }

    proptest! {
        #[test]
        fn file_names_have_fixed_length(key in "\\PC{1,1024}") {
            let store = FsFallbackStore::new("/tmp/tierstore");
            let path = store.path_for(&key);
            prop_assert_eq!(path.parent(), Some(store.dir()));
            let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
            prop_assert_eq!(name.len(), 64 + 1 + EXTENSION.len());
        }
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_decode_error() {
        let temp = TempDir::new().unwrap();
        let store = FsFallbackStore::new(temp.path());
        std::fs::write(store.path_for("a"), "{ truncated").unwrap();

        let err = store.load("a").await.unwrap_err();
        assert_eq!(err.kind(), tierstore_core::ErrorKind::SerializationError);
    }
}
