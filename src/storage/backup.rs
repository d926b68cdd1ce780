//! JSON backup file
//!
//! A secondary, human-readable mirror of the content store. One JSON
//! array of content items; merged by canonical URL with last-write-wins
//! semantics. The sync controller treats backup failures as
//! non-fatal, so every operation here either succeeds fully or leaves
//! the previous file intact.

use std::path::{Path, PathBuf};

use crate::data::ContentItem;
use crate::error::AppError;

/// Handle on the backup file. The file may not exist yet.
pub struct JsonBackup {
    path: PathBuf,
}

impl JsonBackup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full backup. A missing file is an empty backup;
    /// unreadable or corrupt content is an error.
    pub async fn load(&self) -> Result<Vec<ContentItem>, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "backup {} unreadable: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Persistence(format!("backup {} corrupt: {}", self.path.display(), e))
        })
    }

    /// Merge items into the backup, keyed by canonical URL.
    ///
    /// Existing entries keep their position and are overwritten when an
    /// incoming item shares their URL; new items are appended. A corrupt
    /// existing file is logged and treated as empty rather than blocking
    /// the merge forever. Returns the total entry count after merging.
    pub async fn merge(&self, items: &[ContentItem]) -> Result<usize, AppError> {
        let mut entries = match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), %e, "Backup unreadable, starting fresh");
                Vec::new()
            }
        };

        let mut appended = 0usize;
        let mut replaced = 0usize;
        for item in items {
            match entries
                .iter_mut()
                .find(|existing| existing.canonical_url == item.canonical_url)
            {
                Some(existing) => {
                    *existing = item.clone();
                    replaced += 1;
                }
                None => {
                    entries.push(item.clone());
                    appended += 1;
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Persistence(format!("creating backup directory failed: {}", e))
            })?;
        }

        let body = serde_json::to_vec_pretty(&entries)
            .map_err(|e| AppError::Persistence(format!("encoding backup failed: {}", e)))?;
        write_atomic(&self.path, &body).await.map_err(|e| {
            AppError::Persistence(format!("writing backup {} failed: {}", self.path.display(), e))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            appended,
            replaced,
            total = entries.len(),
            "Backup merged"
        );
        Ok(entries.len())
    }
}

/// Write via a sibling temp file and rename so readers never observe a
/// partially written file.
pub(crate) async fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}
