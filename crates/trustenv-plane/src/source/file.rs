//! Filesystem segment source

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::{SegmentSource, SourceError};

/// Reads segment files from the local filesystem
#[derive(Debug, Default, Clone)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SegmentSource for FileSource {
    async fn read(&self, path: &Path) -> Result<Vec<u8>, SourceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::from_io(path, e))?;
        debug!(path = %path.display(), size = bytes.len(), "Read segment file");
        Ok(bytes)
    }
}
