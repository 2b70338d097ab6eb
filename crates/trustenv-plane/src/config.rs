//! Runtime configuration
//!
//! Read once from the process environment at startup. Every setting has a
//! default so an empty environment yields a usable configuration.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::PlaneError;

/// Default directory (relative to the root) holding the bootstrap files
pub const DEFAULT_DATA_DIR: &str = "environments/data";
/// Default extension of persisted segment files
pub const DEFAULT_FILE_EXT: &str = "cbor";
/// Default bound on optimistic key update attempts
pub const DEFAULT_KEY_UPDATE_ATTEMPTS: usize = 64;
/// Default decode limit for a single segment file (1 MiB)
pub const DEFAULT_MAX_SEGMENT_BYTES: usize = trustenv_core::MAX_RECORD_SIZE;

/// Trust plane configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneConfig {
    /// Root directory the bootstrap layout is resolved against
    pub root: PathBuf,
    /// Bootstrap directory under `root`
    pub data_dir: PathBuf,
    /// Extension of persisted segment files, without the dot
    pub file_ext: String,
    /// Log level name for the binary's subscriber
    pub log_level: String,
    /// Retry bound for the key registry's compare-and-swap loop
    pub key_update_attempts: usize,
    /// Upper bound on the size of one encoded segment
    pub max_segment_bytes: usize,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            file_ext: DEFAULT_FILE_EXT.to_string(),
            log_level: "info".to_string(),
            key_update_attempts: DEFAULT_KEY_UPDATE_ATTEMPTS,
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
        }
    }
}

impl PlaneConfig {
    /// Load configuration from `TRUSTENV_*` environment variables
    pub fn from_env() -> Result<Self, PlaneError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PlaneError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("TRUSTENV_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Some(data_dir) = lookup("TRUSTENV_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(ext) = lookup("TRUSTENV_FILE_EXT") {
            config.file_ext = ext.trim_start_matches('.').to_string();
        }
        if let Some(level) = lookup("TRUSTENV_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(raw) = lookup("TRUSTENV_KEY_UPDATE_ATTEMPTS") {
            config.key_update_attempts = parse_positive("TRUSTENV_KEY_UPDATE_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("TRUSTENV_MAX_SEGMENT_BYTES") {
            config.max_segment_bytes = parse_positive("TRUSTENV_MAX_SEGMENT_BYTES", &raw)?;
        }

        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_file_ext(mut self, ext: impl Into<String>) -> Self {
        self.file_ext = ext.into();
        self
    }

    pub fn with_key_update_attempts(mut self, attempts: usize) -> Self {
        self.key_update_attempts = attempts;
        self
    }

    pub fn with_max_segment_bytes(mut self, max: usize) -> Self {
        self.max_segment_bytes = max;
        self
    }

    /// Absolute-or-relative directory holding the bootstrap files
    pub fn bootstrap_dir(&self) -> PathBuf {
        self.root.join(&self.data_dir)
    }

    /// File name for a stem, e.g. `main-env` -> `main-env.cbor`
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.file_ext)
    }

    /// Resolve a caller-supplied path: absolute paths are used as-is,
    /// relative ones are joined to the root
    pub fn resolve_specific(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize, PlaneError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(PlaneError::Config(format!("{key} must be greater than zero"))),
        Ok(value) => Ok(value),
        Err(e) => Err(PlaneError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PlaneConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PlaneConfig::default());
        assert_eq!(config.key_update_attempts, 64);
        assert_eq!(config.max_segment_bytes, 1024 * 1024);
        assert_eq!(config.file_name("main-env"), "main-env.cbor");
        assert_eq!(config.bootstrap_dir(), PathBuf::from("./environments/data"));
    }

    #[test]
    fn test_overrides() {
        let config = PlaneConfig::from_lookup(lookup(&[
            ("TRUSTENV_ROOT", "/srv/app"),
            ("TRUSTENV_FILE_EXT", ".bin"),
            ("TRUSTENV_KEY_UPDATE_ATTEMPTS", "8"),
        ]))
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/app"));
        assert_eq!(config.file_name("task-env"), "task-env.bin");
        assert_eq!(config.key_update_attempts, 8);
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let result = PlaneConfig::from_lookup(lookup(&[("TRUSTENV_MAX_SEGMENT_BYTES", "lots")]));
        assert!(matches!(result, Err(PlaneError::Config(_))));

        let result = PlaneConfig::from_lookup(lookup(&[("TRUSTENV_KEY_UPDATE_ATTEMPTS", "0")]));
        assert!(matches!(result, Err(PlaneError::Config(_))));
    }

    #[test]
    fn test_specific_paths() {
        let config = PlaneConfig::default().with_root("/srv/app");
        assert_eq!(
            config.resolve_specific(Path::new("/keys/alice.pub")),
            PathBuf::from("/keys/alice.pub")
        );
        assert_eq!(
            config.resolve_specific(Path::new("owners/alice.pub")),
            PathBuf::from("/srv/app/owners/alice.pub")
        );
    }
}
