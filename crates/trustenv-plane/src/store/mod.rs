//! Typed environment store
//!
//! A process-wide registry of independently locked, named segments. Each
//! segment holds a homogeneous `EnvSegment<K, V>`; the store keeps it as
//! canonical bytes tagged with its Rust type, so every write copies in and
//! every read decodes a fresh, independent value.

pub mod memory;

pub use memory::SegmentStore;

use thiserror::Error;
use trustenv_core::{ByteBuf, EnvSegment, EnvValue, WhitelistEntry};

/// Segment of raw byte values, the shape of `main` and every chain stage
pub type ByteSegment = EnvSegment<String, EnvValue<ByteBuf>>;

/// Segment of whitelist entries keyed by whitelist key
pub type WhitelistSegment = EnvSegment<String, WhitelistEntry>;

/// Well-known segment names
pub mod names {
    pub const MAIN: &str = "main";
    pub const WHITELIST: &str = "whitelist";
    pub const PATH: &str = "path";
    pub const TASK: &str = "task";
    pub const REST: &str = "rest";
    pub const FUNC: &str = "func";
    pub const FUNC_ERROR: &str = "func-error";
}

/// Keys of the `main` segment read by the trust plane
pub mod main_keys {
    /// Directory holding access grant files
    pub const ACCESS_DATA_PATH: &str = "access-data-path";
    /// Directory holding owner-supplied chain segments
    pub const EXTERNAL_ENV_BASE_PATH: &str = "external-env-base-path";
    pub const FUNC_PERM: &str = "func-perm";
    pub const OWNER_WHITELIST: &str = "owner-whitelist";
}

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("segment already exists: {0}")]
    AlreadyExists(String),

    #[error("segment not found: {0}")]
    NotFound(String),

    #[error("segment '{segment}' holds {stored}, requested {requested}")]
    TypeMismatch {
        segment: String,
        stored: &'static str,
        requested: &'static str,
    },

    #[error("key {key} not found in segment '{segment}'")]
    KeyNotFound { segment: String, key: String },

    #[error("segment codec error: {0}")]
    Codec(#[from] trustenv_core::Error),
}
