//! Hash primitives and constant-time comparisons
//!
//! Hashes are returned as self-describing multihashes so the algorithm
//! travels with the digest.

use crate::codec::canonicalize;
use crate::error::{Error, Result};
use cid::multihash::Multihash;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sha3::{Sha3_256, Sha3_512};
use subtle::ConstantTimeEq;

/// Multihash code for SHA2-256
pub const MH_SHA2_256: u64 = 0x12;
/// Multihash code for SHA3-512
pub const MH_SHA3_512: u64 = 0x14;
/// Multihash code for SHA3-256
pub const MH_SHA3_256: u64 = 0x16;

/// Supported hash algorithms with their wire identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HashAlgorithm {
    #[default]
    Sha3_256 = 0,
    Sha3_512 = 1,
    Sha2_256 = 2,
}

impl HashAlgorithm {
    /// Map a wire identifier to an algorithm. Unknown codes fall back to SHA3-256.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => HashAlgorithm::Sha3_512,
            2 => HashAlgorithm::Sha2_256,
            _ => HashAlgorithm::Sha3_256,
        }
    }

    /// Wire identifier
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Multihash code of the algorithm
    pub fn multihash_code(self) -> u64 {
        match self {
            HashAlgorithm::Sha3_256 => MH_SHA3_256,
            HashAlgorithm::Sha3_512 => MH_SHA3_512,
            HashAlgorithm::Sha2_256 => MH_SHA2_256,
        }
    }

    /// Raw digest without the multihash prefix
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha3_256 => Sha3_256::digest(data).to_vec(),
            HashAlgorithm::Sha3_512 => Sha3_512::digest(data).to_vec(),
            HashAlgorithm::Sha2_256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Wrap a digest as a multihash
pub(crate) fn wrap_multihash(code: u64, digest: &[u8]) -> Result<Multihash<64>> {
    Multihash::<64>::wrap(code, digest).map_err(|e| Error::Serialization(e.to_string()))
}

/// Hash `data` and return the multihash bytes
pub fn hash(data: &[u8], algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    let digest = algorithm.digest(data);
    Ok(wrap_multihash(algorithm.multihash_code(), &digest)?.to_bytes())
}

/// Hash a string and return the hex-encoded multihash
pub fn hash_hex(data: &str, algorithm: HashAlgorithm) -> Result<String> {
    Ok(hex::encode(hash(data.as_bytes(), algorithm)?))
}

/// Hash the canonical encoding of a structured value
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    hash(&canonicalize(value)?, algorithm)
}

/// Constant-time byte comparison
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Constant-time string comparison
pub fn ct_eq_str(a: &str, b: &str) -> bool {
    ct_eq(a.as_bytes(), b.as_bytes())
}

/// Decode two hex strings and compare them in constant time.
/// Returns false when either side is not valid hex.
pub fn ct_eq_hex(a: &str, b: &str) -> bool {
    match (hex::decode(a), hex::decode(b)) {
        (Ok(a), Ok(b)) => ct_eq(&a, &b),
        _ => false,
    }
}

/// Whitelist key for an account: hex SHA2-256 of `secret || account`
pub fn derive_whitelist_key(account: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(account.as_bytes());
    hex::encode(hasher.finalize())
}
