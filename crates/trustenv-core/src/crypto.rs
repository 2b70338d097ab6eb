//! Signature verification primitives
//!
//! Signing is an action of an external authority (the system signer or an
//! owner). This module only verifies: a signature is always checked over the
//! canonical encoding of the signed value, so structurally equal values
//! verify identically.
//!
//! Key types:
//! - `SignatureAlgorithm`: the wire identifier of a signature scheme
//! - `SignedBlob` (see `types`): signer id + signature bytes

use crate::codec::canonicalize;
use crate::error::{Error, Result};
use crate::types::SignedBlob;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::Serialize;

/// Supported signature schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    /// EdDSA over Curve25519
    EdDsa = 1,
}

impl SignatureAlgorithm {
    /// Wire identifier
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SignatureAlgorithm {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            1 => Ok(SignatureAlgorithm::EdDsa),
            other => Err(Error::InvalidSignType(other)),
        }
    }
}

/// Verify `signature` over `payload` with `public_key`.
///
/// Fails with `InvalidSignType` for an unknown algorithm id and with
/// `InvalidSignatureComponents` for a malformed key, malformed signature or
/// failed check.
pub fn verify_signature(
    public_key: &[u8],
    payload: &[u8],
    signature: &[u8],
    algorithm: u8,
) -> Result<()> {
    match SignatureAlgorithm::try_from(algorithm)? {
        SignatureAlgorithm::EdDsa => verify_ed25519(public_key, payload, signature),
    }
}

fn verify_ed25519(public_key: &[u8], payload: &[u8], signature: &[u8]) -> Result<()> {
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = public_key
        .try_into()
        .map_err(|_| Error::InvalidSignatureComponents)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| Error::InvalidSignatureComponents)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| Error::InvalidSignatureComponents)?;

    verifying_key
        .verify(payload, &signature)
        .map_err(|_| Error::InvalidSignatureComponents)
}

/// Canonicalize `value` and verify the blob's signature over it (EdDSA)
pub fn verify_signed<T: Serialize + ?Sized>(
    value: &T,
    blob: &SignedBlob,
    public_key: &[u8],
) -> Result<()> {
    let payload = canonicalize(value)?;
    verify_signature(
        public_key,
        &payload,
        &blob.signature,
        SignatureAlgorithm::EdDsa.id(),
    )
}

/// Short printable fingerprint of key material, safe for logs
pub fn key_fingerprint(public_key: &[u8]) -> String {
    let end = public_key.len().min(8);
    hex::encode(&public_key[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_bytes::ByteBuf;

    #[test]
    fn test_verify_valid_signature() {
        let sk = SigningKey::generate(&mut OsRng);
        let payload = b"canonical payload";
        let signature = sk.sign(payload).to_bytes();

        let pk = sk.verifying_key().to_bytes();
        assert!(verify_signature(&pk, payload, &signature, 1).is_ok());
    }

    #[test]
    fn test_verification_fails_with_wrong_key() {
        let sk1 = SigningKey::generate(&mut OsRng);
        let sk2 = SigningKey::generate(&mut OsRng);
        let signature = sk1.sign(b"data").to_bytes();

        // Signed with key 1, checked against key 2
        let result = verify_signature(&sk2.verifying_key().to_bytes(), b"data", &signature, 1);
        assert!(matches!(result, Err(Error::InvalidSignatureComponents)));
    }

    #[test]
    fn test_unknown_algorithm() {
        let sk = SigningKey::generate(&mut OsRng);
        let signature = sk.sign(b"data").to_bytes();
        let result = verify_signature(&sk.verifying_key().to_bytes(), b"data", &signature, 7);
        assert!(matches!(result, Err(Error::InvalidSignType(7))));
    }

    #[test]
    fn test_malformed_components() {
        let sk = SigningKey::generate(&mut OsRng);
        let signature = sk.sign(b"data").to_bytes();

        // Truncated key
        let pk = sk.verifying_key().to_bytes();
        assert!(matches!(
            verify_signature(&pk[..31], b"data", &signature, 1),
            Err(Error::InvalidSignatureComponents)
        ));

        // Truncated signature
        assert!(matches!(
            verify_signature(&pk, b"data", &signature[..63], 1),
            Err(Error::InvalidSignatureComponents)
        ));
    }

    #[test]
    fn test_verify_signed_value() {
        let sk = SigningKey::generate(&mut OsRng);
        let value = vec!["a".to_string(), "b".to_string()];
        let payload = canonicalize(&value).unwrap();

        let blob = SignedBlob {
            signer_id: "system".into(),
            signature: ByteBuf::from(sk.sign(&payload).to_bytes().to_vec()),
        };

        let pk = sk.verifying_key().to_bytes();
        assert!(verify_signed(&value, &blob, &pk).is_ok());

        let tampered = vec!["a".to_string(), "c".to_string()];
        assert!(verify_signed(&tampered, &blob, &pk).is_err());
    }

    #[test]
    fn test_fingerprint_is_short() {
        assert_eq!(key_fingerprint(&[0xab; 32]), "abababababababab");
        assert_eq!(key_fingerprint(&[0x01, 0x02]), "0102");
    }
}
