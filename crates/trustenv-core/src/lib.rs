//! # Trustenv Core
//!
//! Data model and cryptographic primitives for a signed, self-hosted
//! environment store.
//!
//! ## Key Concepts
//!
//! - **Status window**: activation/expiry metadata validated before any record is trusted
//! - **Segment**: a named collection of environment entries, signed by the system
//! - **Whitelist entry**: binds an owner to its key location and access grant address
//! - **Access grant**: owner + system signed list of task permissions
//! - **Content address**: CIDv1 binding a reference to the exact bytes it names
//!
//! Everything here is pure: no I/O, no locks. The runtime side lives in
//! `trustenv-plane`.

pub mod codec;
pub mod content_address;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod permission;
pub mod status;
pub mod types;

pub use codec::{canonicalize, decode, decode_limited, deep_copy, UniqueMap, MAX_RECORD_SIZE};
pub use content_address::{
    compare_content_address, compare_content_address_bytes, compute_content_address,
    content_address_of, content_address_to_string,
};
pub use crypto::{key_fingerprint, verify_signature, verify_signed, SignatureAlgorithm};
pub use error::{Error, LifecycleError, Result};
pub use hash::{derive_whitelist_key, hash, HashAlgorithm};
pub use permission::{check_task_authorization, check_task_authorization_at, Permission};
pub use status::{
    unix_now, validate_live_record, validate_live_record_at, validate_new_record,
    validate_new_record_at, StatusWindow,
};
pub use types::{
    AccessGrant, AccessKeyClaim, AuthnRecord, EnvSegment, EnvValue, FieldDescriptor,
    PermissionGrant, PublicKeyRecord, SignedAccessKeyClaim, SignedBlob, SignedEnvSegment,
    TokenData, WhitelistEntry,
};

/// Re-exported so downstream crates name byte fields with the same type
pub use serde_bytes::ByteBuf;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
