//! Trust-chain access control
//!
//! Decides whether a caller presenting a signed access key claim may act on
//! the environment, and with which task permissions.
//!
//! The flow for every attempt:
//!
//! 1. Resolve the whitelist entry named by the claim (live)
//! 2. Resolve the owner's public key from the entry's locator (live)
//! 3. Verify the owner's signature over the claim
//! 4. Compare the claim's access grant address with the whitelist binding
//! 5. Fetch the access grant, check its content address, verify the owner
//!    and system signatures, live-check its authn record
//! 6. Check the required task permissions against the grant
//!
//! Any failure ends the attempt. Nothing is retried.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trustenv_core::{
    check_task_authorization_at, compare_content_address_bytes, compute_content_address,
    content_address_to_string, decode_limited, key_fingerprint, unix_now, validate_live_record_at,
    AccessGrant, ByteBuf, EnvValue, Permission, PublicKeyRecord, SignedAccessKeyClaim,
    WhitelistEntry,
};

use crate::config::PlaneConfig;
use crate::error::ChainError;
use crate::keys::{KeyRegistry, RegistryError, SYSTEM_OWNER};
use crate::source::{fetch, Location, SegmentSource, SourceError};
use crate::store::{main_keys, names, SegmentStore, StoreError};

/// Outcome of steps 1–4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaim {
    pub whitelist_key: String,
    pub entry: WhitelistEntry,
    pub public_key: Vec<u8>,
}

/// A caller that passed the whole chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedOwner {
    pub whitelist_key: String,
    /// Locator of the owner's key, also its registry id
    pub locator: String,
    pub public_key: Vec<u8>,
    pub grant: AccessGrant,
}

/// Runs the trust chain against shared plane state
#[derive(Debug, Clone)]
pub struct TrustChain {
    store: Arc<SegmentStore>,
    registry: Arc<KeyRegistry>,
    source: Arc<dyn SegmentSource>,
    config: Arc<PlaneConfig>,
}

impl TrustChain {
    pub fn new(
        store: Arc<SegmentStore>,
        registry: Arc<KeyRegistry>,
        source: Arc<dyn SegmentSource>,
        config: Arc<PlaneConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            source,
            config,
        }
    }

    /// Steps 1–4 at `now`
    pub async fn verify_claim_at(
        &self,
        signed: &SignedAccessKeyClaim,
        now: i64,
    ) -> Result<VerifiedClaim, ChainError> {
        let whitelist_key = &signed.claim.whitelist_key;

        // Step 1: Resolve the whitelist entry
        let entry: WhitelistEntry = self
            .store
            .get_entry(names::WHITELIST, whitelist_key)
            .map_err(|e| {
                warn!(whitelist_key = %whitelist_key, error = %e, "SECURITY: Unknown whitelist key");
                e
            })?;
        validate_live_record_at(&entry.status, now)
            .map_err(|e| ChainError::lifecycle("whitelist entry", e))?;

        // Step 2: Resolve the owner's public key
        let locator = &entry.owner_key_locator;
        let key = self.owner_key(locator).await?;
        validate_live_record_at(&key.status, now)
            .map_err(|e| ChainError::lifecycle("owner key", e))?;

        // Step 3: Verify the owner's signature over the claim
        signed.verify(&key.public_key).map_err(|e| {
            warn!(
                whitelist_key = %whitelist_key,
                owner = %locator,
                fingerprint = %key_fingerprint(&key.public_key),
                "SECURITY: Claim signature verification failed"
            );
            e
        })?;
        validate_live_record_at(&signed.claim.status, now)
            .map_err(|e| ChainError::lifecycle("access key claim", e))?;

        // Step 4: The claimed grant must be the one the whitelist binds
        compare_content_address_bytes(&entry.access_grant_address, &signed.claim.access_grant_address)
            .map_err(|e| {
                warn!(whitelist_key = %whitelist_key, error = %e, "SECURITY: Access grant address rejected");
                e
            })?;

        debug!(whitelist_key = %whitelist_key, owner = %locator, "Claim verified");
        Ok(VerifiedClaim {
            whitelist_key: whitelist_key.clone(),
            entry,
            public_key: key.public_key.into_vec(),
        })
    }

    /// Steps 1–4 against the wall clock
    pub async fn verify_claim(&self, signed: &SignedAccessKeyClaim) -> Result<VerifiedClaim, ChainError> {
        self.verify_claim_at(signed, unix_now()).await
    }

    /// Step 5 at `now`: fetch and verify the access grant a verified claim points at
    pub async fn resolve_grant_at(
        &self,
        verified: &VerifiedClaim,
        now: i64,
    ) -> Result<AccessGrant, ChainError> {
        let address = &verified.entry.access_grant_address;
        let dir = main_path(&self.store, main_keys::ACCESS_DATA_PATH)?;
        let file = self.config.file_name(&content_address_to_string(address)?);
        let path = Location::Specific(dir.join(file)).resolve(&self.config);

        let bytes = self.source.read(&path).await?;
        let max = self.config.max_segment_bytes;
        if bytes.len() > max {
            return Err(SourceError::TooLarge {
                path,
                size: bytes.len(),
                max,
            }
            .into());
        }

        // The file must be exactly the bytes the whitelist names
        let actual = compute_content_address(&bytes)?;
        compare_content_address_bytes(address, &actual).map_err(|e| {
            warn!(
                whitelist_key = %verified.whitelist_key,
                path = %path.display(),
                "SECURITY: Access grant content does not match its address"
            );
            e
        })?;
        let grant: AccessGrant = decode_limited(&bytes, max).map_err(|source| SourceError::Decode {
            path: path.clone(),
            source,
        })?;

        let system = self.registry.get(SYSTEM_OWNER)?;
        validate_live_record_at(&system.status, now)
            .map_err(|e| ChainError::lifecycle("system key", e))?;

        grant
            .verify(&verified.public_key, &system.public_key)
            .map_err(|e| {
                warn!(
                    whitelist_key = %verified.whitelist_key,
                    owner = %verified.entry.owner_key_locator,
                    "SECURITY: Access grant signature verification failed"
                );
                e
            })?;
        validate_live_record_at(&grant.authn.status, now)
            .map_err(|e| ChainError::lifecycle("access grant", e))?;

        Ok(grant)
    }

    /// Step 5 against the wall clock
    pub async fn resolve_grant(&self, verified: &VerifiedClaim) -> Result<AccessGrant, ChainError> {
        self.resolve_grant_at(verified, unix_now()).await
    }

    /// Steps 1–6 at `now`
    pub async fn authorize_at(
        &self,
        signed: &SignedAccessKeyClaim,
        required: &BTreeMap<String, Permission>,
        now: i64,
    ) -> Result<AuthorizedOwner, ChainError> {
        let verified = self.verify_claim_at(signed, now).await?;
        let grant = self.resolve_grant_at(&verified, now).await?;

        // Step 6: Task permissions (any shared bit authorizes)
        check_task_authorization_at(&grant.authn.permissions, required, now).map_err(|e| {
            warn!(
                whitelist_key = %verified.whitelist_key,
                owner = %verified.entry.owner_key_locator,
                error = %e,
                "SECURITY: Task authorization denied"
            );
            e
        })?;

        info!(
            whitelist_key = %verified.whitelist_key,
            owner = %verified.entry.owner_key_locator,
            tasks = required.len(),
            "Owner authorized"
        );
        Ok(AuthorizedOwner {
            whitelist_key: verified.whitelist_key,
            locator: verified.entry.owner_key_locator,
            public_key: verified.public_key,
            grant,
        })
    }

    /// Steps 1–6 against the wall clock
    pub async fn authorize(
        &self,
        signed: &SignedAccessKeyClaim,
        required: &BTreeMap<String, Permission>,
    ) -> Result<AuthorizedOwner, ChainError> {
        self.authorize_at(signed, required, unix_now()).await
    }

    /// Current key for `locator`, read from its file on every attempt.
    ///
    /// The registry mirrors the last record read. A changed file replaces
    /// the mirrored record and a missing file evicts it.
    async fn owner_key(&self, locator: &str) -> Result<PublicKeyRecord, ChainError> {
        if locator == SYSTEM_OWNER {
            warn!("SECURITY: Whitelist entry names the reserved system id as owner");
            return Err(RegistryError::InvalidOwnerKey(locator.to_string()).into());
        }

        let path = Location::specific(locator).resolve(&self.config);
        let record: PublicKeyRecord =
            match fetch(self.source.as_ref(), &path, self.config.max_segment_bytes).await {
                Ok(record) => record,
                Err(e) => {
                    if matches!(e, SourceError::FileNotFound(_)) && self.registry.delete(locator) {
                        warn!(owner = %locator, "SECURITY: Owner key file removed, cached key evicted");
                    }
                    return Err(e.into());
                }
            };

        match self.registry.get(locator) {
            Ok(cached) if cached == record => {}
            Ok(_) => {
                info!(
                    owner = %locator,
                    fingerprint = %key_fingerprint(&record.public_key),
                    "Owner key file changed, refreshing cached key"
                );
                self.registry.upsert(locator, record.clone());
            }
            Err(_) => self.registry.upsert(locator, record.clone()),
        }
        Ok(record)
    }
}

/// Read a path-valued entry of the `main` segment
pub(crate) fn main_path(store: &SegmentStore, key: &str) -> Result<PathBuf, ChainError> {
    let value: EnvValue<ByteBuf> = store
        .get_entry(names::MAIN, &key.to_string())
        .map_err(|e| match e {
            StoreError::KeyNotFound { .. } => ChainError::MissingMainEntry(key.to_string()),
            other => other.into(),
        })?;

    let text = String::from_utf8(value.value.into_vec()).map_err(|_| ChainError::InvalidMainEntry {
        key: key.to_string(),
        reason: "not valid UTF-8".into(),
    })?;
    if text.trim().is_empty() {
        return Err(ChainError::InvalidMainEntry {
            key: key.to_string(),
            reason: "empty path".into(),
        });
    }
    Ok(PathBuf::from(text))
}
