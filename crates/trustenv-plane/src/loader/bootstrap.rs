//! Root-of-trust bootstrap
//!
//! Loads the system-owned records from the bootstrap directory: the system
//! public key, the whitelist and the main segment. Both segments must carry
//! a valid signature by the system key. Everything is fetched and checked
//! before anything is committed.
//!
//! Runs are serialized: a run holds the bootstrap lock from its first read
//! to its last write, so concurrent reloads commit one after another and the
//! last to finish has read the newest files.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use trustenv_core::{
    key_fingerprint, unix_now, validate_live_record_at, ByteBuf, EnvValue, PublicKeyRecord,
    SignedEnvSegment, WhitelistEntry,
};

use super::{replace_segment, restore_segment};
use crate::config::PlaneConfig;
use crate::error::ChainError;
use crate::keys::{KeyRegistry, SYSTEM_OWNER};
use crate::source::{fetch, Location, SegmentSource};
use crate::store::{names, ByteSegment, SegmentStore, WhitelistSegment};
use crate::validation::{validate, validate_external_segment_at, LifecycleMode};

/// Bootstrap file stems
pub const SYSTEM_PUB_KEY_FILE: &str = "system-pub-key";
pub const MAIN_ENV_FILE: &str = "main-env";
pub const WHITELIST_ENV_FILE: &str = "whitelist-env";

/// How bootstrap records are checked and written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// First load: records are new, written with create/register
    Initial,
    /// Re-run on file change: records are live, written with update/upsert
    Reload,
}

impl BootstrapMode {
    fn lifecycle(self) -> LifecycleMode {
        match self {
            BootstrapMode::Initial => LifecycleMode::New,
            BootstrapMode::Reload => LifecycleMode::Live,
        }
    }
}

/// What a bootstrap run loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub mode: BootstrapMode,
    pub system_key_fingerprint: String,
    pub whitelist_entries: usize,
    pub main_entries: usize,
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    store: Arc<SegmentStore>,
    registry: Arc<KeyRegistry>,
    source: Arc<dyn SegmentSource>,
    config: Arc<PlaneConfig>,
    /// Shared by clones
    run_lock: Arc<Mutex<()>>,
}

impl Bootstrap {
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
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    fn location(&self, stem: &str) -> std::path::PathBuf {
        Location::Bootstrap(self.config.file_name(stem)).resolve(&self.config)
    }

    /// Run the bootstrap at `now`
    pub async fn run_at(&self, mode: BootstrapMode, now: i64) -> Result<BootstrapReport, ChainError> {
        let _guard = self.run_lock.lock().await;
        let max = self.config.max_segment_bytes;

        // Step 1: System key. It is the root of trust, so it is live-checked
        // in both modes and carries no signature of its own.
        let system: PublicKeyRecord =
            fetch(self.source.as_ref(), &self.location(SYSTEM_PUB_KEY_FILE), max).await?;
        validate_live_record_at(&system.status, now)
            .map_err(|e| ChainError::lifecycle("system key", e))?;

        // Step 2: Whitelist, signed by the system key
        let whitelist: SignedEnvSegment<String, WhitelistEntry> =
            fetch(self.source.as_ref(), &self.location(WHITELIST_ENV_FILE), max).await?;
        verify_system_signature(&whitelist, &system, names::WHITELIST)?;
        check_whitelist(&whitelist.segment, mode.lifecycle(), now)?;

        // Step 3: Main segment, signed by the system key
        let main: SignedEnvSegment<String, EnvValue<ByteBuf>> =
            fetch(self.source.as_ref(), &self.location(MAIN_ENV_FILE), max).await?;
        verify_system_signature(&main, &system, names::MAIN)?;
        let report = validate_external_segment_at(&main.segment, names::MAIN, now, mode.lifecycle());
        if !report.is_valid {
            return Err(ChainError::Shape {
                stage: names::MAIN.to_string(),
                errors: report.errors,
            });
        }

        let fingerprint = key_fingerprint(&system.public_key);
        let report = BootstrapReport {
            mode,
            system_key_fingerprint: fingerprint,
            whitelist_entries: whitelist.segment.len(),
            main_entries: main.segment.len(),
        };

        // Step 4: Commit
        match mode {
            BootstrapMode::Initial => self.commit_initial(system, &whitelist.segment, &main.segment)?,
            BootstrapMode::Reload => self.commit_reload(system, &whitelist.segment, &main.segment)?,
        }

        info!(
            mode = ?mode,
            fingerprint = %report.system_key_fingerprint,
            whitelist_entries = report.whitelist_entries,
            main_entries = report.main_entries,
            "Bootstrap complete"
        );
        Ok(report)
    }

    /// [`Bootstrap::run_at`] against the wall clock
    pub async fn run(&self, mode: BootstrapMode) -> Result<BootstrapReport, ChainError> {
        self.run_at(mode, unix_now()).await
    }

    fn commit_initial(
        &self,
        system: PublicKeyRecord,
        whitelist: &WhitelistSegment,
        main: &ByteSegment,
    ) -> Result<(), ChainError> {
        self.registry.register(SYSTEM_OWNER, system)?;

        if let Err(e) = self.store.create_segment(names::WHITELIST, whitelist) {
            self.registry.delete(SYSTEM_OWNER);
            return Err(e.into());
        }
        if let Err(e) = self.store.create_segment(names::MAIN, main) {
            self.store.delete_segment(names::WHITELIST);
            self.registry.delete(SYSTEM_OWNER);
            return Err(e.into());
        }
        Ok(())
    }

    fn commit_reload(
        &self,
        system: PublicKeyRecord,
        whitelist: &WhitelistSegment,
        main: &ByteSegment,
    ) -> Result<(), ChainError> {
        let previous_key = self.registry.get(SYSTEM_OWNER).ok();
        let restore_key = |registry: &KeyRegistry| match previous_key.clone() {
            Some(record) => registry.upsert(SYSTEM_OWNER, record),
            None => {
                registry.delete(SYSTEM_OWNER);
            }
        };
        self.registry.upsert(SYSTEM_OWNER, system);

        let previous_whitelist = match replace_segment(&self.store, names::WHITELIST, whitelist) {
            Ok(previous) => previous,
            Err(e) => {
                restore_key(&self.registry);
                return Err(e.into());
            }
        };
        if let Err(e) = replace_segment(&self.store, names::MAIN, main) {
            restore_segment(&self.store, names::WHITELIST, previous_whitelist);
            restore_key(&self.registry);
            return Err(e.into());
        }
        Ok(())
    }
}

fn verify_system_signature<T>(
    signed: &SignedEnvSegment<String, T>,
    system: &PublicKeyRecord,
    segment: &str,
) -> Result<(), ChainError>
where
    trustenv_core::EnvSegment<String, T>: serde::Serialize,
{
    signed.verify(&system.public_key).map_err(|e| {
        warn!(
            segment = %segment,
            fingerprint = %key_fingerprint(&system.public_key),
            "SECURITY: Bootstrap segment signature verification failed"
        );
        ChainError::from(e)
    })
}

fn check_whitelist(segment: &WhitelistSegment, mode: LifecycleMode, now: i64) -> Result<(), ChainError> {
    mode.check(&segment.status, now)
        .map_err(|e| ChainError::lifecycle("whitelist segment", e))?;
    for (key, entry) in &segment.entries {
        mode.check(&entry.status, now)
            .map_err(|e| ChainError::lifecycle(format!("whitelist entry '{key}'"), e))?;
    }

    let report = validate(segment, names::WHITELIST);
    if !report.is_valid {
        return Err(ChainError::Shape {
            stage: names::WHITELIST.to_string(),
            errors: report.errors,
        });
    }
    Ok(())
}
