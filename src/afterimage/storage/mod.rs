pub mod media_files;

use crate::afterimage::error::Result;
use std::path::Path;

/// Storage layer for managing filesystem operations
pub struct Storage {
    pub(crate) media_files: media_files::MediaFileStorage,
}

impl Storage {
    /// Creates a new Storage instance rooted at the configured media directory
    pub(crate) fn new(media_dir: &Path) -> Result<Self> {
        Ok(Self {
            media_files: media_files::MediaFileStorage::new(media_dir)?,
        })
    }
}
