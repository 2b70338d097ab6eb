//! Segment sources
//!
//! Where signed segment files come from. A source only moves bytes; decoding,
//! signature checks and validation happen in the callers, and always before
//! any store lock is taken.

pub mod file;
pub mod memory;

pub use file::FileSource;
pub use memory::MemorySource;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::PlaneConfig;

/// Error type for source reads
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("unexpected I/O error on {}: {source}", .path.display())]
    Unexpected {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is {size} bytes, limit is {max}", .path.display())]
    TooLarge { path: PathBuf, size: usize, max: usize },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: trustenv_core::Error,
    },
}

impl SourceError {
    /// Classify an I/O error for `path`
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SourceError::FileNotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => SourceError::PermissionDenied(path.to_path_buf()),
            _ => SourceError::Unexpected {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Where a segment file lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A file name inside the configured bootstrap directory
    Bootstrap(String),
    /// A caller-supplied path; relative paths are taken from the root
    Specific(PathBuf),
}

impl Location {
    pub fn bootstrap(file: impl Into<String>) -> Self {
        Location::Bootstrap(file.into())
    }

    pub fn specific(path: impl Into<PathBuf>) -> Self {
        Location::Specific(path.into())
    }

    /// Resolve to a concrete path under `config`
    pub fn resolve(&self, config: &PlaneConfig) -> PathBuf {
        match self {
            Location::Bootstrap(file) => config.bootstrap_dir().join(file),
            Location::Specific(path) => config.resolve_specific(path),
        }
    }
}

/// Byte source for signed segment files
///
/// Implementations must be thread-safe. No deadline is imposed here; callers
/// wrap reads in their own timeouts.
#[async_trait]
pub trait SegmentSource: Send + Sync + Debug {
    /// Read the whole file at `path`
    async fn read(&self, path: &Path) -> Result<Vec<u8>, SourceError>;
}

/// Read and decode one record, bounding its encoded size
pub async fn fetch<T>(source: &dyn SegmentSource, path: &Path, max: usize) -> Result<T, SourceError>
where
    T: DeserializeOwned,
{
    let bytes = source.read(path).await?;
    if bytes.len() > max {
        return Err(SourceError::TooLarge {
            path: path.to_path_buf(),
            size: bytes.len(),
            max,
        });
    }

    debug!(path = %path.display(), size = bytes.len(), "Fetched record");
    trustenv_core::decode_limited(&bytes, max).map_err(|source| SourceError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustenv_core::{canonicalize, PublicKeyRecord, StatusWindow};

    #[test]
    fn test_location_resolution() {
        let config = PlaneConfig::default().with_root("/srv/app");

        assert_eq!(
            Location::bootstrap("main-env.cbor").resolve(&config),
            PathBuf::from("/srv/app/environments/data/main-env.cbor")
        );
        assert_eq!(
            Location::specific("/keys/alice.pub").resolve(&config),
            PathBuf::from("/keys/alice.pub")
        );
        assert_eq!(
            Location::specific("owners/alice.pub").resolve(&config),
            PathBuf::from("/srv/app/owners/alice.pub")
        );
    }

    #[test]
    fn test_io_error_classification() {
        let path = Path::new("/x");
        assert!(matches!(
            SourceError::from_io(path, io::Error::from(io::ErrorKind::NotFound)),
            SourceError::FileNotFound(_)
        ));
        assert!(matches!(
            SourceError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied)),
            SourceError::PermissionDenied(_)
        ));
        assert!(matches!(
            SourceError::from_io(path, io::Error::from(io::ErrorKind::InvalidData)),
            SourceError::Unexpected { .. }
        ));
    }

    #[tokio::test]
    async fn test_fetch_decodes_and_bounds() {
        let record = PublicKeyRecord::new(vec![3u8; 32], StatusWindow::active_from(1, "k"));
        let source = MemorySource::new();
        source.insert("/keys/k.pub", canonicalize(&record).unwrap());

        let decoded: PublicKeyRecord = fetch(&source, Path::new("/keys/k.pub"), 1024).await.unwrap();
        assert_eq!(decoded, record);

        let err = fetch::<PublicKeyRecord>(&source, Path::new("/keys/k.pub"), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::TooLarge { max: 8, .. }));
    }

    #[tokio::test]
    async fn test_fetch_rejects_wrong_shape() {
        let source = MemorySource::new();
        source.insert("/bad", vec![0xff, 0x00]);

        let err = fetch::<PublicKeyRecord>(&source, Path::new("/bad"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
