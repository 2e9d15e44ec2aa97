//! Attachment store: enumerates the media directory and picks a file.

use rand::seq::IndexedRandom as _;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Candidate media files, read live from a directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a file in the media directory.
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// List regular files (or symlinks to them) in the media directory.
    ///
    /// A missing or unreadable directory yields an empty set. Hidden files
    /// (leading `.`) and subdirectories are skipped.
    pub async fn list_candidates(&self) -> BTreeSet<String> {
        let mut candidates = BTreeSet::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::debug!(path = %self.dir.display(), %error, "media directory not readable");
                return candidates;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(path = %self.dir.display(), %error, "failed to read media directory entry");
                    break;
                }
            };

            // Follows symlinks; a dangling link is not a candidate.
            let is_file = tokio::fs::metadata(entry.path())
                .await
                .map(|metadata| metadata.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            // Non-UTF-8 names can't be sent as attachment names or cache keys.
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            candidates.insert(name);
        }

        candidates
    }

    /// Uniformly pick one candidate, or `None` when there are none.
    pub async fn pick_random(&self) -> Option<String> {
        let candidates: Vec<String> = self.list_candidates().await.into_iter().collect();
        candidates.choose(&mut rand::rng()).cloned()
    }
}
