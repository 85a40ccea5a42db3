//! Persistence of partially uploaded resources, so that a new session for the
//! same file can ask the server to continue instead of starting over.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResumeStoreError {
    #[error("resume store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("resume store at {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn find(&self, fingerprint: &str) -> Result<Option<String>, ResumeStoreError>;
    async fn save(&self, fingerprint: &str, url: &str) -> Result<(), ResumeStoreError>;
    async fn remove(&self, fingerprint: &str) -> Result<(), ResumeStoreError>;
}

/// Stable identity of a file at an endpoint: sha-256 hex over its attributes.
pub fn fingerprint(endpoint: &str, name: &str, media_type: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    for part in [endpoint, name, media_type] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(size.to_be_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ResumeStore for MemoryResumeStore {
    async fn find(&self, fingerprint: &str) -> Result<Option<String>, ResumeStoreError> {
        Ok(self.entries.read().await.get(fingerprint).cloned())
    }

    async fn save(&self, fingerprint: &str, url: &str) -> Result<(), ResumeStoreError> {
        self.entries
            .write()
            .await
            .insert(fingerprint.to_string(), url.to_string());
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), ResumeStoreError> {
        self.entries.write().await.remove(fingerprint);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    uploads: HashMap<String, String>,
}

/// JSON file of fingerprint → resource URL. Every call rereads the file.
#[derive(Debug)]
pub struct FileResumeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<StoreFile, ResumeStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(StoreFile::default()),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| ResumeStoreError::Corrupt {
                path: self.display(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(source) => Err(ResumeStoreError::Io {
                path: self.display(),
                source,
            }),
        }
    }

    async fn persist(&self, file: &StoreFile) -> Result<(), ResumeStoreError> {
        let raw = serde_json::to_vec_pretty(file).map_err(|source| ResumeStoreError::Corrupt {
            path: self.display(),
            source,
        })?;
        let tmp = self.path.with_extension("tmp");
        let io_err = |source| ResumeStoreError::Io {
            path: self.display(),
            source,
        };
        tokio::fs::write(&tmp, raw).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        debug!(path = %self.path.display(), entries = file.uploads.len(), "Resume store written");
        Ok(())
    }
}

#[async_trait]
impl ResumeStore for FileResumeStore {
    async fn find(&self, fingerprint: &str) -> Result<Option<String>, ResumeStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.uploads.get(fingerprint).cloned())
    }

    async fn save(&self, fingerprint: &str, url: &str) -> Result<(), ResumeStoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        file.uploads.insert(fingerprint.to_string(), url.to_string());
        self.persist(&file).await
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), ResumeStoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        if file.uploads.remove(fingerprint).is_some() {
            self.persist(&file).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("vod-resume-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn fingerprint_depends_on_every_attribute() {
        let base = fingerprint("https://u.example.com/files/", "a.mp4", "video/mp4", 10);
        assert_eq!(base.len(), 64);
        assert_eq!(base, fingerprint("https://u.example.com/files/", "a.mp4", "video/mp4", 10));
        assert_ne!(base, fingerprint("https://u.example.com/files/", "a.mp4", "video/mp4", 11));
        assert_ne!(base, fingerprint("https://u.example.com/files/", "b.mp4", "video/mp4", 10));
        assert_ne!(base, fingerprint("https://other.example.com/", "a.mp4", "video/mp4", 10));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryResumeStore::new();
        assert_eq!(store.find("fp").await.unwrap(), None);
        store.save("fp", "https://u.example.com/files/1").await.unwrap();
        assert_eq!(
            store.find("fp").await.unwrap().as_deref(),
            Some("https://u.example.com/files/1")
        );
        store.remove("fp").await.unwrap();
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let path = temp_path();
        FileResumeStore::new(&path)
            .save("fp", "https://u.example.com/files/1")
            .await
            .unwrap();

        let reopened = FileResumeStore::new(&path);
        assert_eq!(
            reopened.find("fp").await.unwrap().as_deref(),
            Some("https://u.example.com/files/1")
        );
        reopened.remove("fp").await.unwrap();
        assert_eq!(reopened.find("fp").await.unwrap(), None);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let store = FileResumeStore::new(temp_path());
        assert_eq!(store.find("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let path = temp_path();
        tokio::fs::write(&path, b"not json").await.unwrap();
        let err = FileResumeStore::new(&path).find("fp").await.unwrap_err();
        assert!(matches!(err, ResumeStoreError::Corrupt { .. }));
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
