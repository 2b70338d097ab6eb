//! Content addresses (CIDv1)
//!
//! A content address binds a reference to the exact bytes it names. Only one
//! profile is accepted anywhere in the system: CID version 1, the dag-cbor
//! codec and a SHA2-256 multihash. Anything else is `InvalidCid`.

use crate::codec::canonicalize;
use crate::error::{Error, Result};
use crate::hash::{ct_eq, wrap_multihash, HashAlgorithm, MH_SHA2_256};
use cid::{Cid, Version};
use serde::Serialize;

/// Multicodec code for dag-cbor
pub const DAG_CBOR: u64 = 0x71;

/// Compute the CIDv1 (dag-cbor, sha2-256) of raw bytes
pub fn compute_content_address(data: &[u8]) -> Result<Vec<u8>> {
    let digest = HashAlgorithm::Sha2_256.digest(data);
    let mh = wrap_multihash(MH_SHA2_256, &digest)?;
    Ok(Cid::new_v1(DAG_CBOR, mh).to_bytes())
}

/// Compute the content address of a value's canonical encoding
pub fn content_address_of<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    compute_content_address(&canonicalize(value)?)
}

/// Text form (multibase base32) of binary content address bytes
pub fn content_address_to_string(bytes: &[u8]) -> Result<String> {
    let cid = validate_content_address_bytes(bytes)?;
    Ok(cid.to_string())
}

fn check_profile(cid: Cid) -> Result<Cid> {
    if cid.version() != Version::V1 {
        return Err(Error::InvalidCid("version is not 1".into()));
    }
    if cid.codec() != DAG_CBOR {
        return Err(Error::InvalidCid(format!("codec {:#x} is not dag-cbor", cid.codec())));
    }
    if cid.hash().code() != MH_SHA2_256 {
        return Err(Error::InvalidCid(format!(
            "multihash {:#x} is not sha2-256",
            cid.hash().code()
        )));
    }
    Ok(cid)
}

/// Parse and validate a textual content address
pub fn validate_content_address_str(text: &str) -> Result<Cid> {
    check_profile(Cid::try_from(text)?)
}

/// Parse and validate a binary content address
pub fn validate_content_address_bytes(bytes: &[u8]) -> Result<Cid> {
    check_profile(Cid::try_from(bytes)?)
}

/// Compare a reference address against a candidate in text form.
///
/// The candidate is decoded and validated first; the byte comparison is
/// constant time.
pub fn compare_content_address(reference: &[u8], candidate: &str) -> Result<()> {
    let candidate = validate_content_address_str(candidate)?;
    if !ct_eq(reference, &candidate.to_bytes()) {
        return Err(Error::CidMismatch);
    }
    Ok(())
}

/// Compare a reference address against a candidate in binary form
pub fn compare_content_address_bytes(reference: &[u8], candidate: &[u8]) -> Result<()> {
    let candidate = validate_content_address_bytes(candidate)?;
    if !ct_eq(reference, &candidate.to_bytes()) {
        return Err(Error::CidMismatch);
    }
    Ok(())
}
