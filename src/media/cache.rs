//! Upload cache: remembers the hosted URL of every media file already uploaded.
//!
//! The cache is a single JSON document mapping file name to URL. Every write
//! rewrites the whole document through a temp file and a rename, so a crash
//! can leave the document stale but never half-written. Persistence is
//! best-effort: failures are logged and the in-memory map stays authoritative
//! for the rest of the process.

use crate::error::CacheError;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A media file that has been uploaded at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAttachment {
    pub file_name: String,
    /// Hosted URL returned by the platform. `None` for entries recorded
    /// without a usable URL; those count as misses.
    pub remote_url: Option<String>,
}

/// On-disk shape: `{ "file.png": "https://..." }`, sorted by file name.
type Document = BTreeMap<String, Option<String>>;

/// File name to hosted URL map with a JSON document behind it.
///
/// The map sits behind an async mutex that is held across `put` and the
/// rewrite that follows, so writers are serialized and the document on disk
/// always reflects a complete map.
#[derive(Debug)]
pub struct UploadCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CachedAttachment>>,
}

impl UploadCache {
    /// Create an empty cache backed by `path`. Nothing is read until `load`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory map with the document on disk.
    ///
    /// A missing document gives an empty cache. A malformed or unreadable one
    /// is logged and also gives an empty cache. Returns the number of entries
    /// loaded.
    pub async fn load(&self) -> usize {
        let loaded = match read_document(&self.path).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "no upload cache found, starting empty");
                Document::new()
            }
            Err(error) => {
                tracing::warn!(%error, "discarding unusable upload cache");
                Document::new()
            }
        };

        let mut entries = self.entries.lock().await;
        *entries = loaded
            .into_iter()
            .map(|(file_name, remote_url)| {
                (
                    file_name.clone(),
                    CachedAttachment {
                        file_name,
                        remote_url,
                    },
                )
            })
            .collect();

        tracing::debug!(entries = entries.len(), "upload cache loaded");
        entries.len()
    }

    /// Hosted URL for `file_name`, if one is cached.
    pub async fn get(&self, file_name: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(file_name)
            .and_then(|entry| entry.remote_url.clone())
    }

    /// Full cache entry for `file_name`.
    #[cfg(test)]
    pub(crate) async fn entry(&self, file_name: &str) -> Option<CachedAttachment> {
        self.entries.lock().await.get(file_name).cloned()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Record the hosted URL for `file_name` and rewrite the document before
    /// returning.
    pub async fn put(&self, file_name: &str, url: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            file_name.to_string(),
            CachedAttachment {
                file_name: file_name.to_string(),
                remote_url: Some(url.to_string()),
            },
        );
        self.persist_locked(&entries).await;
    }

    /// Rewrite the document from the in-memory map.
    pub async fn persist(&self) {
        let entries = self.entries.lock().await;
        self.persist_locked(&entries).await;
    }

    /// Drop entries whose file is no longer among `file_names`.
    ///
    /// Persists only when something was removed. Returns the number of
    /// entries dropped.
    pub async fn retain_files(&self, file_names: &BTreeSet<String>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|file_name, _| file_names.contains(file_name));
        let removed = before - entries.len();

        if removed > 0 {
            tracing::info!(removed, "pruned upload cache entries for deleted media");
            self.persist_locked(&entries).await;
        }
        removed
    }

    async fn persist_locked(&self, entries: &BTreeMap<String, CachedAttachment>) {
        let document: Document = entries
            .values()
            .map(|entry| (entry.file_name.clone(), entry.remote_url.clone()))
            .collect();

        if let Err(error) = write_document(&self.path, &document).await {
            tracing::warn!(%error, "failed to persist upload cache");
        }
    }
}

/// Read and parse the cache document. `Ok(None)` when it does not exist.
async fn read_document(path: &Path) -> Result<Option<Document>, CacheError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| CacheError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `document` and atomically replace the file at `path`.
async fn write_document(path: &Path, document: &Document) -> Result<(), CacheError> {
    let mut bytes = serde_json::to_vec_pretty(document)?;
    bytes.push(b'\n');

    let target = path.to_path_buf();
    let write_error = |source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|error| error.error)?;
        Ok(())
    })
    .await
    .map_err(|error| write_error(std::io::Error::other(error)))?
    .map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_document_loads_empty() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let cache = UploadCache::new(tempdir.path().join("upload_cache.json"));

        assert_eq!(cache.load().await, 0);
        assert!(cache.is_empty().await);
        assert_eq!(cache.get("a.png").await, None);
    }

    #[tokio::test]
    async fn malformed_document_loads_empty() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("upload_cache.json");
        std::fs::write(&path, b"{ this is not json").expect("write corrupt cache");

        let cache = UploadCache::new(&path);

        assert_eq!(cache.load().await, 0);
        assert_eq!(cache.get("a.png").await, None);
    }

    #[tokio::test]
    async fn put_persists_before_returning() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("upload_cache.json");

        let cache = UploadCache::new(&path);
        cache.load().await;
        cache.put("a.png", "https://cdn.example/a.png").await;

        let reloaded = UploadCache::new(&path);
        assert_eq!(reloaded.load().await, 1);
        assert_eq!(
            reloaded.get("a.png").await.as_deref(),
            Some("https://cdn.example/a.png")
        );
    }

    #[tokio::test]
    async fn repeated_put_keeps_document_byte_identical() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("upload_cache.json");

        let cache = UploadCache::new(&path);
        cache.put("b.png", "https://cdn.example/b.png").await;
        cache.put("a.png", "https://cdn.example/a.png").await;
        let first = std::fs::read(&path).expect("cache document should exist");

        cache.put("a.png", "https://cdn.example/a.png").await;
        let second = std::fs::read(&path).expect("cache document should exist");

        assert_eq!(first, second);
        assert_eq!(
            cache.get("a.png").await.as_deref(),
            Some("https://cdn.example/a.png")
        );
    }

    #[tokio::test]
    async fn document_is_a_plain_name_to_url_map() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("upload_cache.json");

        let cache = UploadCache::new(&path);
        cache.put("cat.gif", "https://cdn.example/cat.gif").await;

        let raw = std::fs::read_to_string(&path).expect("cache document should exist");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("document should be json");
        assert_eq!(
            parsed,
            serde_json::json!({ "cat.gif": "https://cdn.example/cat.gif" })
        );
    }

    #[tokio::test]
    async fn write_failure_keeps_in_memory_entry() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("missing-dir").join("upload_cache.json");

        let cache = UploadCache::new(&path);
        cache.put("a.png", "https://cdn.example/a.png").await;

        assert!(!path.exists());
        assert_eq!(
            cache.get("a.png").await.as_deref(),
            Some("https://cdn.example/a.png")
        );
    }

    #[tokio::test]
    async fn null_url_entries_are_misses() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("upload_cache.json");
        std::fs::write(&path, br#"{ "a.png": null }"#).expect("write cache");

        let cache = UploadCache::new(&path);
        assert_eq!(cache.load().await, 1);
        assert_eq!(cache.get("a.png").await, None);
        assert_eq!(
            cache.entry("a.png").await,
            Some(CachedAttachment {
                file_name: "a.png".into(),
                remote_url: None,
            })
        );
    }

    #[tokio::test]
    async fn retain_files_prunes_deleted_media() {
        let tempdir = tempfile::tempdir().expect("failed to create tempdir");
        let path = tempdir.path().join("upload_cache.json");

        let cache = UploadCache::new(&path);
        cache.put("kept.png", "https://cdn.example/kept.png").await;
        cache.put("gone.png", "https://cdn.example/gone.png").await;

        let on_disk: BTreeSet<String> = ["kept.png".to_string()].into_iter().collect();
        assert_eq!(cache.retain_files(&on_disk).await, 1);
        assert_eq!(cache.retain_files(&on_disk).await, 0);

        let reloaded = UploadCache::new(&path);
        assert_eq!(reloaded.load().await, 1);
        assert_eq!(reloaded.get("gone.png").await, None);
        assert!(reloaded.get("kept.png").await.is_some());
    }
}
