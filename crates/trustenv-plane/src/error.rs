//! Error types for the trust plane
//!
//! Component errors stay typed in their own modules. [`PlaneError`] gathers
//! them for the facade and the binary, and [`ErrorClass`] gives an outer
//! HTTP or CLI layer a coarse category to map onto a status code.

use thiserror::Error;
use trustenv_core::LifecycleError;

use crate::keys::RegistryError;
use crate::source::SourceError;
use crate::store::StoreError;
use crate::validation::ShapeError;

/// Failures raised while authorizing an owner or loading a chain
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Core(#[from] trustenv_core::Error),

    #[error("{record} rejected: {source}")]
    Lifecycle {
        record: String,
        #[source]
        source: LifecycleError,
    },

    #[error("main segment has no '{0}' entry")]
    MissingMainEntry(String),

    #[error("main entry '{key}' is unusable: {reason}")]
    InvalidMainEntry { key: String, reason: String },

    #[error("invalid chain table: {0}")]
    InvalidChainTable(String),

    #[error("stage '{stage}' key set mismatch (missing {missing:?}, unexpected {unexpected:?})")]
    UnexpectedKeys {
        stage: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("stage '{stage}' failed validation with {} error(s)", .errors.len())]
    Shape {
        stage: String,
        errors: Vec<ShapeError>,
    },
}

impl ChainError {
    pub(crate) fn lifecycle(record: impl Into<String>, source: LifecycleError) -> Self {
        ChainError::Lifecycle {
            record: record.into(),
            source,
        }
    }
}

/// Coarse error category for outer layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential or signature could not be verified (401)
    Unauthorized,
    /// Verified caller lacks permission, or the record is not live (403)
    Forbidden,
    /// Referenced segment, key or file does not exist (404)
    NotFound,
    /// Write collided with existing state (409)
    Conflict,
    /// Malformed input (400)
    Invalid,
    /// Everything else (500)
    Internal,
}

impl ErrorClass {
    /// Conventional HTTP status code for this class
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::Unauthorized => 401,
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Invalid => 400,
            ErrorClass::Internal => 500,
        }
    }
}

/// Top-level error for the trust plane
#[derive(Error, Debug)]
pub enum PlaneError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Core(#[from] trustenv_core::Error),
}

impl PlaneError {
    /// Classify for an outer layer
    pub fn class(&self) -> ErrorClass {
        match self {
            PlaneError::Config(_) => ErrorClass::Internal,
            PlaneError::Store(e) => store_class(e),
            PlaneError::Registry(e) => registry_class(e),
            PlaneError::Source(e) => source_class(e),
            PlaneError::Chain(e) => chain_class(e),
            PlaneError::Core(e) => core_class(e),
        }
    }
}

fn core_class(err: &trustenv_core::Error) -> ErrorClass {
    use trustenv_core::Error;
    match err {
        Error::Lifecycle(_) | Error::InvalidTaskAuthn { .. } => ErrorClass::Forbidden,
        Error::CidMismatch
        | Error::InvalidSignatureComponents
        | Error::InvalidSignType(_)
        | Error::InvalidCid(_) => ErrorClass::Unauthorized,
        Error::PayloadTooLarge { .. } | Error::Deserialization(_) => ErrorClass::Invalid,
        Error::Serialization(_) => ErrorClass::Internal,
    }
}

fn store_class(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::AlreadyExists(_) => ErrorClass::Conflict,
        StoreError::NotFound(_) | StoreError::KeyNotFound { .. } => ErrorClass::NotFound,
        StoreError::TypeMismatch { .. } => ErrorClass::Internal,
        StoreError::Codec(e) => core_class(e),
    }
}

fn registry_class(err: &RegistryError) -> ErrorClass {
    match err {
        RegistryError::OwnerKeyAlreadyExists(_) => ErrorClass::Conflict,
        RegistryError::InvalidOwnerKey(_) => ErrorClass::Unauthorized,
        RegistryError::Contention { .. } => ErrorClass::Conflict,
    }
}

fn source_class(err: &SourceError) -> ErrorClass {
    match err {
        SourceError::FileNotFound(_) => ErrorClass::NotFound,
        SourceError::TooLarge { .. } | SourceError::Decode { .. } => ErrorClass::Invalid,
        SourceError::PermissionDenied(_) | SourceError::Unexpected { .. } => ErrorClass::Internal,
    }
}

fn chain_class(err: &ChainError) -> ErrorClass {
    match err {
        ChainError::Store(e) => store_class(e),
        ChainError::Registry(e) => registry_class(e),
        ChainError::Source(e) => source_class(e),
        ChainError::Core(e) => core_class(e),
        ChainError::Lifecycle { .. } => ErrorClass::Forbidden,
        ChainError::UnexpectedKeys { .. } | ChainError::Shape { .. } => ErrorClass::Invalid,
        ChainError::MissingMainEntry(_)
        | ChainError::InvalidMainEntry { .. }
        | ChainError::InvalidChainTable(_) => ErrorClass::Internal,
    }
}
