//! Chained environment loading
//!
//! Owner-supplied segments enter the store in table order, and only as a
//! whole: every stage is fetched, signature-checked and validated before the
//! first one is committed. A failed commit puts back whatever the earlier
//! stages replaced.

pub mod bootstrap;
pub mod chain;

pub use bootstrap::{Bootstrap, BootstrapMode, BootstrapReport};
pub use chain::{ChainStage, ChainTable, StageSpec, Successor};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use trustenv_core::{unix_now, ByteBuf, EnvSegment, EnvValue, SignedAccessKeyClaim, SignedEnvSegment};

use crate::access::{main_path, AuthorizedOwner, TrustChain};
use crate::config::PlaneConfig;
use crate::error::ChainError;
use crate::source::{fetch, Location, SegmentSource};
use crate::store::{main_keys, ByteSegment, SegmentStore, StoreError};
use crate::validation::{validate_external_segment_at, LifecycleMode};

/// Result of a committed chain load
#[derive(Debug, Clone)]
pub struct ChainLoad {
    pub owner: AuthorizedOwner,
    /// Stages committed, in load order
    pub stages: Vec<ChainStage>,
}

/// Loads an owner's chain of segments into the store
#[derive(Debug)]
pub struct ChainLoader {
    trust: TrustChain,
    store: Arc<SegmentStore>,
    source: Arc<dyn SegmentSource>,
    config: Arc<PlaneConfig>,
    table: Arc<ChainTable>,
    commit_lock: Mutex<()>,
}

impl ChainLoader {
    pub fn new(
        trust: TrustChain,
        store: Arc<SegmentStore>,
        source: Arc<dyn SegmentSource>,
        config: Arc<PlaneConfig>,
        table: Arc<ChainTable>,
    ) -> Self {
        Self {
            trust,
            store,
            source,
            config,
            table,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn table(&self) -> &ChainTable {
        &self.table
    }

    /// Authorize `claim` for every stage, then load the whole chain at `now`
    pub async fn load_at(&self, claim: &SignedAccessKeyClaim, now: i64) -> Result<ChainLoad, ChainError> {
        let owner = self
            .trust
            .authorize_at(claim, &self.table.required_permissions(), now)
            .await?;
        let base = main_path(&self.store, main_keys::EXTERNAL_ENV_BASE_PATH)?;

        let mut staged: Vec<(ChainStage, ByteSegment)> = Vec::with_capacity(self.table.order().len());
        for &stage in self.table.order() {
            let segment = self.fetch_stage(stage, &base, &owner, now).await?;
            staged.push((stage, segment));
        }

        self.commit(&staged)?;

        let stages: Vec<ChainStage> = staged.iter().map(|(stage, _)| *stage).collect();
        info!(
            owner = %owner.locator,
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Chain loaded"
        );
        Ok(ChainLoad { owner, stages })
    }

    /// [`ChainLoader::load_at`] against the wall clock
    pub async fn load(&self, claim: &SignedAccessKeyClaim) -> Result<ChainLoad, ChainError> {
        self.load_at(claim, unix_now()).await
    }

    async fn fetch_stage(
        &self,
        stage: ChainStage,
        base: &std::path::Path,
        owner: &AuthorizedOwner,
        now: i64,
    ) -> Result<ByteSegment, ChainError> {
        let spec = self
            .table
            .spec(stage)
            .ok_or_else(|| ChainError::InvalidChainTable(format!("no row for '{stage}'")))?;

        let path = Location::Specific(base.join(self.config.file_name(stage.file_stem())))
            .resolve(&self.config);
        let signed: SignedEnvSegment<String, EnvValue<ByteBuf>> =
            fetch(self.source.as_ref(), &path, self.config.max_segment_bytes).await?;

        signed.verify(&owner.public_key).map_err(|e| {
            warn!(
                stage = %stage,
                owner = %owner.locator,
                "SECURITY: Stage segment signature verification failed"
            );
            e
        })?;

        let (missing, unexpected) = spec.key_mismatch(signed.segment.entries.keys());
        if !missing.is_empty() || !unexpected.is_empty() {
            warn!(stage = %stage, ?missing, ?unexpected, "Stage key set mismatch");
            return Err(ChainError::UnexpectedKeys {
                stage: stage.name().to_string(),
                missing,
                unexpected,
            });
        }

        let report = validate_external_segment_at(&signed.segment, stage.name(), now, LifecycleMode::New);
        if !report.is_valid {
            return Err(ChainError::Shape {
                stage: stage.name().to_string(),
                errors: report.errors,
            });
        }

        Ok(signed.segment)
    }

    fn commit(&self, staged: &[(ChainStage, ByteSegment)]) -> Result<(), ChainError> {
        let _guard = self.commit_lock.lock();

        let mut committed: Vec<(ChainStage, Option<ByteSegment>)> = Vec::with_capacity(staged.len());
        for (stage, segment) in staged {
            match replace_segment(&self.store, stage.name(), segment) {
                Ok(previous) => {
                    info!(stage = %stage, replaced = previous.is_some(), "Committed chain stage");
                    committed.push((*stage, previous));
                }
                Err(e) => {
                    warn!(stage = %stage, error = %e, "Chain commit failed, rolling back");
                    for (done, previous) in committed.into_iter().rev() {
                        restore_segment(&self.store, done.name(), previous);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

/// Write `segment` under `name`, creating or updating as needed.
/// Returns the segment it replaced.
pub(crate) fn replace_segment<K, V>(
    store: &SegmentStore,
    name: &str,
    segment: &EnvSegment<K, V>,
) -> Result<Option<EnvSegment<K, V>>, StoreError>
where
    EnvSegment<K, V>: Serialize + DeserializeOwned + 'static,
{
    match store.get_segment::<K, V>(name) {
        Ok(previous) => {
            store.update_segment(name, segment)?;
            Ok(Some(previous))
        }
        Err(StoreError::NotFound(_)) => {
            store.create_segment(name, segment)?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Undo a [`replace_segment`]
pub(crate) fn restore_segment<K, V>(store: &SegmentStore, name: &str, previous: Option<EnvSegment<K, V>>)
where
    EnvSegment<K, V>: Serialize + DeserializeOwned + 'static,
{
    let restored = match previous {
        Some(segment) => store.update_segment(name, &segment).is_ok(),
        None => store.delete_segment(name),
    };
    if !restored {
        warn!(segment = %name, "Rollback could not restore segment");
    }
}
