//! In-memory segment source
//!
//! Path-keyed bytes held in process. Used when segment files are produced by
//! the embedding application rather than read from disk.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{SegmentSource, SourceError};

#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place (or replace) the bytes served for `path`
    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.write().insert(path.into(), bytes);
    }

    /// Drop the bytes for `path`. Returns whether any were present.
    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path).is_some()
    }
}

#[async_trait]
impl SegmentSource for MemorySource {
    async fn read(&self, path: &Path) -> Result<Vec<u8>, SourceError> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::FileNotFound(path.to_path_buf()))
    }
}
