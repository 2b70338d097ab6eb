//! Error types for the trust environment core

use thiserror::Error;

/// Result type alias using the core [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle failures raised by the status window validators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The record's active flag is off
    #[error("record status is inactive")]
    Inactive,

    /// The record expired before the validation instant
    #[error("record expired at {expires_at}")]
    Expired { expires_at: i64 },

    /// A live record whose activation instant is still in the future
    #[error("record is not active until {active_at}")]
    NotYetActive { active_at: i64 },

    /// A new record whose activation instant lies in the past
    #[error("new record activation at {active_at} is retroactive (now {now})")]
    RetroactiveActivation { active_at: i64, now: i64 },

    /// The status description is empty
    #[error("record status description is required")]
    MissingDescription,
}

/// Errors that can occur in the trust environment core
#[derive(Error, Debug)]
pub enum Error {
    /// Status window rejected by a lifecycle validator
    #[error("lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Content address failed to parse or is not CIDv1/dag-cbor/sha2-256
    #[error("invalid CID: must be CIDv1 with the dag-cbor codec and a sha2-256 multihash ({0})")]
    InvalidCid(String),

    /// Content addresses are well formed but differ
    #[error("CID mismatch: the provided content addresses do not match")]
    CidMismatch,

    /// Public key length or signature check failed
    #[error("invalid signature components")]
    InvalidSignatureComponents,

    /// Unknown signature algorithm identifier
    #[error("invalid signature type: {0}")]
    InvalidSignType(u8),

    /// Required task missing, permission bits disjoint, or grant window invalid
    #[error("invalid task authn for '{task}': {reason}")]
    InvalidTaskAuthn { task: String, reason: String },

    /// Encoded payload exceeds the configured limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// CBOR encoding error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR decoding error (including unknown, duplicate or missing fields)
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether this error belongs to the integrity family (CID or signature)
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::InvalidCid(_)
                | Error::CidMismatch
                | Error::InvalidSignatureComponents
                | Error::InvalidSignType(_)
        )
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Error::Deserialization(err.to_string())
    }
}

impl From<cid::Error> for Error {
    fn from(err: cid::Error) -> Self {
        Error::InvalidCid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_converts_into_core_error() {
        let err: Error = LifecycleError::Inactive.into();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::Inactive)));
        assert!(!err.is_integrity());
    }

    #[test]
    fn test_integrity_family() {
        assert!(Error::CidMismatch.is_integrity());
        assert!(Error::InvalidSignType(9).is_integrity());
        assert!(!Error::PayloadTooLarge { size: 2, max: 1 }.is_integrity());
    }
}
