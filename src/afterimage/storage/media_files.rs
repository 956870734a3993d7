use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::afterimage::error::{AfterimageError, Result};

/// Filesystem storage for recovered media payloads
///
/// Files land flat in the configured media directory:
/// ```text
/// <media_dir>/
///   <unix_millis>_<sanitized_sender>_<suffix>.<ext>
/// ```
///
/// This module handles directory creation and atomic writes. It does NOT
/// fetch media (see `MediaFetcher`) or record anything in the database.
pub struct MediaFileStorage {
    media_dir: PathBuf,
}

impl MediaFileStorage {
    /// Creates the storage, creating `media_dir` if it doesn't exist
    pub(crate) fn new(media_dir: &Path) -> Result<Self> {
        if !media_dir.exists() {
            std::fs::create_dir_all(media_dir).map_err(|e| {
                AfterimageError::MediaCache(format!("Failed to create media directory: {}", e))
            })?;
        }

        Ok(Self {
            media_dir: media_dir.to_path_buf(),
        })
    }

    /// Stores a file using an atomic write (temp file, then rename)
    ///
    /// # Returns
    /// The full path of the stored file
    pub(crate) async fn store_file(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        if !self.media_dir.exists() {
            fs::create_dir_all(&self.media_dir).await.map_err(|e| {
                AfterimageError::MediaCache(format!("Failed to create media directory: {}", e))
            })?;
        }

        let file_path = self.media_dir.join(filename);
        let temp_path = file_path.with_extension("tmp");

        fs::write(&temp_path, data).await.map_err(|e| {
            AfterimageError::MediaCache(format!("Failed to write file data: {}", e))
        })?;

        fs::rename(&temp_path, &file_path).await.map_err(|e| {
            AfterimageError::MediaCache(format!("Failed to rename temp file: {}", e))
        })?;

        Ok(file_path)
    }

    pub(crate) fn media_dir(&self) -> &Path {
        &self.media_dir
    }
}

/// Builds a unique file name from a timestamp and the sender's id.
///
/// The sender is reduced to ASCII alphanumerics so chat ids like
/// `4915550001@s.whatsapp.net` never produce path separators.
pub(crate) fn unique_file_name(timestamp: DateTime<Utc>, sender: &str, extension: &str) -> String {
    let sanitized: String = sender
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(64)
        .collect();
    let sanitized = if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    format!(
        "{}_{}_{}.{}",
        timestamp.timestamp_millis(),
        sanitized,
        &suffix[..8],
        extension
    )
}
