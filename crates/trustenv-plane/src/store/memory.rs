//! In-memory segment store
//!
//! One outer map from segment name to a dedicated lock. The outer lock is
//! only held long enough to find or create a slot; all segment work happens
//! under the slot's own lock, so operations on different segments never wait
//! on each other.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};
use trustenv_core::{canonicalize, decode_limited, EnvSegment, Error as CoreError};

use super::StoreError;
use crate::validation::{Validate, ValidationReport};

/// Canonical bytes of a stored segment plus its Rust type
#[derive(Debug)]
struct StoredSegment {
    type_id: TypeId,
    type_name: &'static str,
    bytes: Vec<u8>,
}

impl StoredSegment {
    fn new<T: 'static>(bytes: Vec<u8>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            bytes,
        }
    }
}

/// Per-name slot. A retired slot has been removed from the outer map and
/// must not accept writes.
#[derive(Debug, Default)]
struct Slot {
    retired: bool,
    segment: Option<StoredSegment>,
}

type SlotRef = Arc<RwLock<Slot>>;

/// Thread-safe store of named, typed environment segments
#[derive(Debug)]
pub struct SegmentStore {
    slots: RwLock<HashMap<String, SlotRef>>,
    max_segment_bytes: usize,
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore {
    /// Create an empty store with the default segment size limit
    pub fn new() -> Self {
        Self::with_limit(trustenv_core::MAX_RECORD_SIZE)
    }

    /// Create an empty store bounding each encoded segment to `max_segment_bytes`
    pub fn with_limit(max_segment_bytes: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_segment_bytes,
        }
    }

    /// Find the slot for `name`, creating it atomically if absent
    fn slot_or_insert(&self, name: &str) -> SlotRef {
        if let Some(slot) = self.slots.read().get(name) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn slot(&self, name: &str) -> Option<SlotRef> {
        self.slots.read().get(name).cloned()
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, StoreError> {
        let bytes = canonicalize(value)?;
        if bytes.len() > self.max_segment_bytes {
            return Err(CoreError::PayloadTooLarge {
                size: bytes.len(),
                max: self.max_segment_bytes,
            }
            .into());
        }
        Ok(bytes)
    }

    fn check_type<T: 'static>(name: &str, stored: &StoredSegment) -> Result<(), StoreError> {
        if stored.type_id != TypeId::of::<T>() {
            return Err(StoreError::TypeMismatch {
                segment: name.to_string(),
                stored: stored.type_name,
                requested: type_name::<T>(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Segment operations
    // =========================================================================

    /// Store a copy of `segment` under a new name
    pub fn create_segment<K, V>(&self, name: &str, segment: &EnvSegment<K, V>) -> Result<(), StoreError>
    where
        EnvSegment<K, V>: Serialize + 'static,
    {
        let bytes = self.encode(segment)?;

        loop {
            let slot = self.slot_or_insert(name);
            let mut guard = slot.write();
            if guard.retired {
                // Deleted between lookup and lock; retry on a fresh slot
                continue;
            }
            if guard.segment.is_some() {
                return Err(StoreError::AlreadyExists(name.to_string()));
            }

            info!(segment = %name, entries = segment.entries_len(), "Created segment");
            guard.segment = Some(StoredSegment::new::<EnvSegment<K, V>>(bytes));
            return Ok(());
        }
    }

    /// Replace an existing segment of the same type with a copy of `segment`
    pub fn update_segment<K, V>(&self, name: &str, segment: &EnvSegment<K, V>) -> Result<(), StoreError>
    where
        EnvSegment<K, V>: Serialize + 'static,
    {
        let bytes = self.encode(segment)?;
        let slot = self
            .slot(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let mut guard = slot.write();
        if guard.retired {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let stored = guard
            .segment
            .as_mut()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Self::check_type::<EnvSegment<K, V>>(name, stored)?;

        stored.bytes = bytes;
        info!(segment = %name, entries = segment.entries_len(), "Updated segment");
        Ok(())
    }

    /// Return an independent copy of a segment
    pub fn get_segment<K, V>(&self, name: &str) -> Result<EnvSegment<K, V>, StoreError>
    where
        EnvSegment<K, V>: DeserializeOwned + 'static,
    {
        let slot = self
            .slot(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let guard = slot.read();
        let stored = guard
            .segment
            .as_ref()
            .filter(|_| !guard.retired)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Self::check_type::<EnvSegment<K, V>>(name, stored)?;

        let segment = decode_limited(&stored.bytes, self.max_segment_bytes)?;
        Ok(segment)
    }

    /// Return an independent copy of one entry
    pub fn get_entry<K, V>(&self, name: &str, key: &K) -> Result<V, StoreError>
    where
        K: Ord + Debug,
        EnvSegment<K, V>: DeserializeOwned + 'static,
    {
        let mut segment = self.get_segment::<K, V>(name)?;
        segment
            .entries
            .remove(key)
            .ok_or_else(|| StoreError::KeyNotFound {
                segment: name.to_string(),
                key: format!("{key:?}"),
            })
    }

    /// Remove a segment together with its lock. Returns whether it existed.
    pub fn delete_segment(&self, name: &str) -> bool {
        let mut slots = self.slots.write();
        let Some(slot) = slots.remove(name) else {
            return false;
        };

        let mut guard = slot.write();
        guard.retired = true;
        let existed = guard.segment.take().is_some();
        if existed {
            info!(segment = %name, "Deleted segment");
        }
        existed
    }

    /// Whether a segment is currently stored under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.slot(name)
            .map(|slot| {
                let guard = slot.read();
                !guard.retired && guard.segment.is_some()
            })
            .unwrap_or(false)
    }

    /// Names of all stored segments, sorted
    pub fn segment_names(&self) -> Vec<String> {
        let slots: Vec<(String, SlotRef)> = self
            .slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        let mut names: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot.read().segment.is_some())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Run deep validation over a stored segment
    pub fn audit<K, V>(&self, name: &str) -> Result<ValidationReport, StoreError>
    where
        EnvSegment<K, V>: DeserializeOwned + Validate + 'static,
    {
        let segment = self.get_segment::<K, V>(name)?;
        let report = crate::validation::validate(&segment, name);
        debug!(segment = %name, valid = report.is_valid, errors = report.errors.len(), "Audited segment");
        Ok(report)
    }
}

/// Entry count for log fields without requiring `K: Ord`
trait EntryCount {
    fn entries_len(&self) -> usize;
}

impl<K, V> EntryCount for EnvSegment<K, V> {
    fn entries_len(&self) -> usize {
        self.entries.len()
    }
}
