//! Public-key registry
//!
//! Owner id -> verification key bindings. Registration is first-writer-wins;
//! updates use optimistic compare-and-swap against the record that was read,
//! retried up to a fixed bound.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use trustenv_core::{key_fingerprint, PublicKeyRecord};

use crate::config::DEFAULT_KEY_UPDATE_ATTEMPTS;

/// Owner id under which the system's own key is registered
pub const SYSTEM_OWNER: &str = "system";

/// Error type for registry operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("owner key already exists: {0}")]
    OwnerKeyAlreadyExists(String),

    #[error("invalid owner key: {0}")]
    InvalidOwnerKey(String),

    #[error("key update for '{owner}' lost the race {attempts} times")]
    Contention { owner: String, attempts: usize },
}

/// Thread-safe registry of owner public keys
///
/// Records are owned by the registry. Callers always receive clones, so no
/// returned value aliases registry state.
#[derive(Debug)]
pub struct KeyRegistry {
    records: RwLock<HashMap<String, Arc<PublicKeyRecord>>>,
    max_update_attempts: usize,
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRegistry {
    /// Create an empty registry with the default retry bound
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_KEY_UPDATE_ATTEMPTS)
    }

    /// Create an empty registry bounding compare-and-swap retries
    pub fn with_max_attempts(max_update_attempts: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_update_attempts: max_update_attempts.max(1),
        }
    }

    /// Register a key. Fails if the owner already has one.
    pub fn register(&self, owner: &str, record: PublicKeyRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write();
        if records.contains_key(owner) {
            warn!(owner = %owner, "Rejected duplicate key registration");
            return Err(RegistryError::OwnerKeyAlreadyExists(owner.to_string()));
        }

        info!(
            owner = %owner,
            fingerprint = %key_fingerprint(&record.public_key),
            "Registered owner key"
        );
        records.insert(owner.to_string(), Arc::new(record));
        Ok(())
    }

    /// Replace an existing key
    pub fn update(&self, owner: &str, record: PublicKeyRecord) -> Result<(), RegistryError> {
        self.update_with(owner, |_| record.clone())
    }

    /// Replace an existing key with a value derived from the current one.
    ///
    /// `f` runs without any lock held and may run more than once. The write
    /// only lands if the record is still the one `f` saw.
    pub fn update_with<F>(&self, owner: &str, f: F) -> Result<(), RegistryError>
    where
        F: Fn(&PublicKeyRecord) -> PublicKeyRecord,
    {
        for attempt in 1..=self.max_update_attempts {
            let current = self
                .records
                .read()
                .get(owner)
                .cloned()
                .ok_or_else(|| RegistryError::InvalidOwnerKey(owner.to_string()))?;

            let next = Arc::new(f(&current));

            let mut records = self.records.write();
            match records.get(owner) {
                Some(stored) if Arc::ptr_eq(stored, &current) => {
                    info!(
                        owner = %owner,
                        fingerprint = %key_fingerprint(&next.public_key),
                        attempt,
                        "Updated owner key"
                    );
                    records.insert(owner.to_string(), next);
                    return Ok(());
                }
                Some(_) => {
                    debug!(owner = %owner, attempt, "Key changed during update, retrying");
                }
                None => return Err(RegistryError::InvalidOwnerKey(owner.to_string())),
            }
        }

        warn!(owner = %owner, attempts = self.max_update_attempts, "Key update gave up under contention");
        Err(RegistryError::Contention {
            owner: owner.to_string(),
            attempts: self.max_update_attempts,
        })
    }

    /// Insert or replace a key
    pub fn upsert(&self, owner: &str, record: PublicKeyRecord) {
        let fingerprint = key_fingerprint(&record.public_key);
        let previous = self
            .records
            .write()
            .insert(owner.to_string(), Arc::new(record));
        info!(
            owner = %owner,
            fingerprint = %fingerprint,
            replaced = previous.is_some(),
            "Upserted owner key"
        );
    }

    /// Get a copy of an owner's record
    pub fn get(&self, owner: &str) -> Result<PublicKeyRecord, RegistryError> {
        self.records
            .read()
            .get(owner)
            .map(|record| PublicKeyRecord::clone(record))
            .ok_or_else(|| RegistryError::InvalidOwnerKey(owner.to_string()))
    }

    /// Remove an owner's key. Returns whether one was present.
    pub fn delete(&self, owner: &str) -> bool {
        let removed = self.records.write().remove(owner).is_some();
        if removed {
            info!(owner = %owner, "Removed owner key");
        }
        removed
    }

    /// Check if an owner has a key
    pub fn contains(&self, owner: &str) -> bool {
        self.records.read().contains_key(owner)
    }

    /// All owner ids, sorted
    pub fn owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self.records.read().keys().cloned().collect();
        owners.sort();
        owners
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
