//! Data model shared by the core and the trust plane
//!
//! Every record encodes as an integer-keyed map. The field numbers listed on
//! each type are the wire contract.

use crate::codec::{int_keyed, UniqueMap};
use crate::crypto::verify_signed;
use crate::error::Result;
use crate::permission::Permission;
use crate::status::StatusWindow;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;

/// A signature produced by an external signer
///
/// Fields: 1 signer_id, 2 signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignedBlob {
    pub signer_id: String,
    pub signature: ByteBuf,
}

int_keyed!(SignedBlob {
    1 => signer_id: String,
    2 => signature: ByteBuf,
});

impl SignedBlob {
    /// Create a blob from raw signature bytes
    pub fn new(signer_id: impl Into<String>, signature: impl Into<Vec<u8>>) -> Self {
        Self {
            signer_id: signer_id.into(),
            signature: ByteBuf::from(signature.into()),
        }
    }
}

/// Raw verification key bytes and their lifecycle
///
/// Fields: 1 public_key, 2 status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub public_key: ByteBuf,
    pub status: StatusWindow,
}

int_keyed!(PublicKeyRecord {
    1 => public_key: ByteBuf,
    2 => status: StatusWindow,
});

impl PublicKeyRecord {
    pub fn new(public_key: impl Into<Vec<u8>>, status: StatusWindow) -> Self {
        Self {
            public_key: ByteBuf::from(public_key.into()),
            status,
        }
    }
}

/// Metadata attached to a value or collection
///
/// Fields: 1 content_address, 2 external_url, 3 description, 4 status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldDescriptor {
    /// CIDv1 bytes, empty when the value is not content-addressed
    pub content_address: ByteBuf,
    pub external_url: String,
    pub description: String,
    pub status: StatusWindow,
}

int_keyed!(FieldDescriptor {
    1 => content_address: ByteBuf,
    2 => external_url: String,
    3 => description: String,
    4 => status: StatusWindow,
});

impl FieldDescriptor {
    /// Descriptor with a description and status only
    pub fn described(description: impl Into<String>, status: StatusWindow) -> Self {
        Self {
            content_address: ByteBuf::new(),
            external_url: String::new(),
            description: description.into(),
            status,
        }
    }
}

/// The atomic unit stored under a key
///
/// Fields: 1 value, 2 field, 3 status.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvValue<V> {
    pub value: V,
    pub field: FieldDescriptor,
    pub status: StatusWindow,
}

int_keyed!(EnvValue<V> {
    1 => value: V,
    2 => field: FieldDescriptor,
    3 => status: StatusWindow,
});

impl<V> EnvValue<V> {
    pub fn new(value: V, field: FieldDescriptor, status: StatusWindow) -> Self {
        Self {
            value,
            field,
            status,
        }
    }
}

/// A named, signable collection of entries
///
/// Fields: 1 entries, 2 field, 3 status.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSegment<K, V> {
    pub entries: BTreeMap<K, V>,
    pub field: FieldDescriptor,
    pub status: StatusWindow,
}

int_keyed!(EnvSegment<K, V> {
    1 => entries: BTreeMap<K, V> as UniqueMap<K, V>,
    2 => field: FieldDescriptor,
    3 => status: StatusWindow,
});

impl<K: Ord, V> EnvSegment<K, V> {
    /// Empty segment
    pub fn new(field: FieldDescriptor, status: StatusWindow) -> Self {
        Self {
            entries: BTreeMap::new(),
            field,
            status,
        }
    }

    /// Add an entry, replacing any previous value for the key
    pub fn with_entry(mut self, key: K, value: V) -> Self {
        self.entries.insert(key, value);
        self
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The persisted unit: a segment plus the system signature over it
///
/// Fields: 1 segment, 2 signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvSegment<K, V> {
    pub segment: EnvSegment<K, V>,
    pub signature: SignedBlob,
}

int_keyed!(SignedEnvSegment<K, V> {
    1 => segment: EnvSegment<K, V>,
    2 => signature: SignedBlob,
});

impl<K, V> SignedEnvSegment<K, V>
where
    EnvSegment<K, V>: serde::Serialize,
{
    /// Verify the signature over the canonical segment
    pub fn verify(&self, public_key: &[u8]) -> Result<()> {
        verify_signed(&self.segment, &self.signature, public_key)
    }
}

/// Binds an owner identity to its key location and access grant address
///
/// Fields: 1 owner_key_locator, 2 access_grant_address, 3 status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub owner_key_locator: String,
    pub access_grant_address: ByteBuf,
    pub status: StatusWindow,
}

int_keyed!(WhitelistEntry {
    1 => owner_key_locator: String,
    2 => access_grant_address: ByteBuf,
    3 => status: StatusWindow,
});

/// Claim presented by a caller
///
/// Fields: 1 whitelist_key, 2 access_grant_address, 3 status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyClaim {
    pub whitelist_key: String,
    pub access_grant_address: ByteBuf,
    pub status: StatusWindow,
}

int_keyed!(AccessKeyClaim {
    1 => whitelist_key: String,
    2 => access_grant_address: ByteBuf,
    3 => status: StatusWindow,
});

/// A claim with the owner's signature over it
///
/// Fields: 1 claim, 2 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAccessKeyClaim {
    pub claim: AccessKeyClaim,
    pub signature: SignedBlob,
}

int_keyed!(SignedAccessKeyClaim {
    1 => claim: AccessKeyClaim,
    2 => signature: SignedBlob,
});

impl SignedAccessKeyClaim {
    pub fn verify(&self, public_key: &[u8]) -> Result<()> {
        verify_signed(&self.claim, &self.signature, public_key)
    }
}

/// Permission bits granted for one task
///
/// Fields: 1 permission, 2 status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    pub permission: Permission,
    pub status: StatusWindow,
}

int_keyed!(PermissionGrant {
    1 => permission: Permission,
    2 => status: StatusWindow,
});

/// Task permissions of an owner
///
/// Fields: 1 permissions, 2 field, 3 status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRecord {
    pub permissions: BTreeMap<String, PermissionGrant>,
    pub field: FieldDescriptor,
    pub status: StatusWindow,
}

int_keyed!(AuthnRecord {
    1 => permissions: BTreeMap<String, PermissionGrant> as UniqueMap<String, PermissionGrant>,
    2 => field: FieldDescriptor,
    3 => status: StatusWindow,
});

/// Dual-signed authorization object referenced by a whitelist entry
///
/// Fields: 1 authn, 2 task_signature (system, over `authn.permissions`),
/// 3 authn_signature (owner, over `authn`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub authn: AuthnRecord,
    pub task_signature: SignedBlob,
    pub authn_signature: SignedBlob,
}

int_keyed!(AccessGrant {
    1 => authn: AuthnRecord,
    2 => task_signature: SignedBlob,
    3 => authn_signature: SignedBlob,
});

impl AccessGrant {
    /// Verify both signatures: the owner's over the whole authn record and the
    /// system's over the permission map.
    pub fn verify(&self, owner_key: &[u8], system_key: &[u8]) -> Result<()> {
        verify_signed(&self.authn, &self.authn_signature, owner_key)?;
        verify_signed(&self.authn.permissions, &self.task_signature, system_key)
    }
}

/// Session token shape. Issuance and refresh are not implemented.
///
/// Fields: 1 access_token, 2 refresh_token, 3 field, 4 status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub access_token: ByteBuf,
    pub refresh_token: ByteBuf,
    pub field: FieldDescriptor,
    pub status: StatusWindow,
}

int_keyed!(TokenData {
    1 => access_token: ByteBuf,
    2 => refresh_token: ByteBuf,
    3 => field: FieldDescriptor,
    4 => status: StatusWindow,
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{canonicalize, decode};
    use crate::error::Error;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn window() -> StatusWindow {
        StatusWindow::active_from(1_700_000_000, "test record")
    }

    fn sign<T: serde::Serialize>(sk: &SigningKey, signer: &str, value: &T) -> SignedBlob {
        let payload = canonicalize(value).unwrap();
        SignedBlob::new(signer, sk.sign(&payload).to_bytes().to_vec())
    }

    #[test]
    fn test_segment_decode_restores_entries() {
        let segment: EnvSegment<String, EnvValue<ByteBuf>> =
            EnvSegment::new(FieldDescriptor::described("main", window()), window())
                .with_entry(
                    "allowed-origins".into(),
                    EnvValue::new(
                        ByteBuf::from(b"https://example.org".to_vec()),
                        FieldDescriptor::described("origins", window()),
                        window(),
                    ),
                );

        let restored: EnvSegment<String, EnvValue<ByteBuf>> =
            decode(&canonicalize(&segment).unwrap()).unwrap();
        assert_eq!(restored, segment);
        assert_eq!(restored.len(), 1);
        assert!(restored.get(&"allowed-origins".to_string()).is_some());
    }

    #[test]
    fn test_signed_segment_verification() {
        let sk = SigningKey::generate(&mut OsRng);
        let segment: EnvSegment<String, WhitelistEntry> =
            EnvSegment::new(FieldDescriptor::described("whitelist", window()), window());
        let signed = SignedEnvSegment {
            signature: sign(&sk, "system", &segment),
            segment,
        };

        let pk = sk.verifying_key().to_bytes();
        assert!(signed.verify(&pk).is_ok());

        // Any change to the segment breaks the signature
        let mut tampered = signed.clone();
        tampered.segment.status.description = "edited".into();
        assert!(matches!(
            tampered.verify(&pk),
            Err(Error::InvalidSignatureComponents)
        ));
    }

    #[test]
    fn test_access_grant_requires_both_signers() {
        let owner = SigningKey::generate(&mut OsRng);
        let system = SigningKey::generate(&mut OsRng);

        let mut permissions = BTreeMap::new();
        permissions.insert(
            "read-config".to_string(),
            PermissionGrant {
                permission: Permission::READ,
                status: window(),
            },
        );
        let authn = AuthnRecord {
            permissions,
            field: FieldDescriptor::described("grant", window()),
            status: window(),
        };

        let grant = AccessGrant {
            task_signature: sign(&system, "system", &authn.permissions),
            authn_signature: sign(&owner, "alice", &authn),
            authn,
        };

        let owner_pk = owner.verifying_key().to_bytes();
        let system_pk = system.verifying_key().to_bytes();
        assert!(grant.verify(&owner_pk, &system_pk).is_ok());

        // Swapped roles fail
        assert!(grant.verify(&system_pk, &owner_pk).is_err());
    }

    #[test]
    fn test_unknown_field_in_record_rejected() {
        // A PublicKeyRecord with an extra key 3
        let value = ciborium::Value::Map(vec![
            (
                ciborium::Value::from(1u8),
                ciborium::Value::Bytes(vec![0u8; 32]),
            ),
            (
                ciborium::Value::from(2u8),
                ciborium::Value::serialized(&window()).unwrap(),
            ),
            (ciborium::Value::from(3u8), ciborium::Value::from("extra")),
        ]);
        let mut raw = Vec::new();
        ciborium::ser::into_writer(&value, &mut raw).unwrap();

        let result: Result<PublicKeyRecord> = decode(&raw);
        assert!(result.is_err());
    }

    fn segment_with_entries(entries: Vec<(ciborium::Value, ciborium::Value)>) -> Vec<u8> {
        let value = ciborium::Value::Map(vec![
            (ciborium::Value::from(1u8), ciborium::Value::Map(entries)),
            (
                ciborium::Value::from(2u8),
                ciborium::Value::serialized(&FieldDescriptor::default()).unwrap(),
            ),
            (
                ciborium::Value::from(3u8),
                ciborium::Value::serialized(&window()).unwrap(),
            ),
        ]);
        let mut raw = Vec::new();
        ciborium::ser::into_writer(&value, &mut raw).unwrap();
        raw
    }

    #[test]
    fn test_segment_with_repeated_entry_rejected() {
        let raw = segment_with_entries(vec![
            (ciborium::Value::from("k"), ciborium::Value::from(1u8)),
            (ciborium::Value::from("k"), ciborium::Value::from(2u8)),
        ]);

        let result: Result<EnvSegment<String, u8>> = decode(&raw);
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
        assert!(err.to_string().contains("duplicate map key"), "{err}");

        // The same bytes with distinct keys decode
        let raw = segment_with_entries(vec![
            (ciborium::Value::from("j"), ciborium::Value::from(1u8)),
            (ciborium::Value::from("k"), ciborium::Value::from(2u8)),
        ]);
        let segment: EnvSegment<String, u8> = decode(&raw).unwrap();
        assert_eq!(segment.len(), 2);
    }

    #[test]
    fn test_segment_with_trailing_bytes_rejected() {
        let mut raw = segment_with_entries(vec![(
            ciborium::Value::from("k"),
            ciborium::Value::from(1u8),
        )]);
        raw.extend_from_slice(b"trailing-garbage");

        let result: Result<EnvSegment<String, u8>> = decode(&raw);
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_authn_with_repeated_task_rejected() {
        let grant = PermissionGrant {
            permission: Permission::READ,
            status: window(),
        };
        let task = ciborium::Value::serialized(&grant).unwrap();
        let value = ciborium::Value::Map(vec![
            (
                ciborium::Value::from(1u8),
                ciborium::Value::Map(vec![
                    (ciborium::Value::from("deploy"), task.clone()),
                    (ciborium::Value::from("deploy"), task),
                ]),
            ),
            (
                ciborium::Value::from(2u8),
                ciborium::Value::serialized(&FieldDescriptor::default()).unwrap(),
            ),
            (
                ciborium::Value::from(3u8),
                ciborium::Value::serialized(&window()).unwrap(),
            ),
        ]);
        let mut raw = Vec::new();
        ciborium::ser::into_writer(&value, &mut raw).unwrap();

        let result: Result<AuthnRecord> = decode(&raw);
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }
}
