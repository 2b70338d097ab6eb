//! Trust plane facade
//!
//! Owns the shared state (store, key registry, source, configuration, chain
//! table) and wires the bootstrap, trust chain and chain loader over it.
//! Construct one per process and hand out references; there is no global.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use trustenv_core::{unix_now, Permission, SignedAccessKeyClaim};

use crate::access::{AuthorizedOwner, TrustChain};
use crate::config::PlaneConfig;
use crate::error::PlaneError;
use crate::keys::KeyRegistry;
use crate::loader::{Bootstrap, BootstrapMode, BootstrapReport, ChainLoad, ChainLoader, ChainTable};
use crate::source::SegmentSource;
use crate::store::SegmentStore;

#[derive(Debug)]
pub struct Plane {
    store: Arc<SegmentStore>,
    registry: Arc<KeyRegistry>,
    config: Arc<PlaneConfig>,
    trust: TrustChain,
    bootstrap: Bootstrap,
    loader: ChainLoader,
}

impl Plane {
    /// Plane with the default chain table
    pub fn new(config: PlaneConfig, source: Arc<dyn SegmentSource>) -> Self {
        Self::with_table(config, source, ChainTable::default_chain())
    }

    pub fn with_table(config: PlaneConfig, source: Arc<dyn SegmentSource>, table: ChainTable) -> Self {
        let store = Arc::new(SegmentStore::with_limit(config.max_segment_bytes));
        let registry = Arc::new(KeyRegistry::with_max_attempts(config.key_update_attempts));
        let config = Arc::new(config);

        let trust = TrustChain::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&source),
            Arc::clone(&config),
        );
        let bootstrap = Bootstrap::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&source),
            Arc::clone(&config),
        );
        let loader = ChainLoader::new(
            trust.clone(),
            Arc::clone(&store),
            source,
            Arc::clone(&config),
            Arc::new(table),
        );

        info!(
            root = %config.root.display(),
            data_dir = %config.data_dir.display(),
            "Trust plane initialized"
        );

        Self {
            store,
            registry,
            config,
            trust,
            bootstrap,
            loader,
        }
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PlaneConfig {
        &self.config
    }

    pub fn trust_chain(&self) -> &TrustChain {
        &self.trust
    }

    pub fn chain_table(&self) -> &ChainTable {
        self.loader.table()
    }

    /// Load the root of trust for the first time
    pub async fn bootstrap(&self) -> Result<BootstrapReport, PlaneError> {
        self.bootstrap_at(unix_now()).await
    }

    pub async fn bootstrap_at(&self, now: i64) -> Result<BootstrapReport, PlaneError> {
        Ok(self.bootstrap.run_at(BootstrapMode::Initial, now).await?)
    }

    /// Re-run the bootstrap over existing state; the entry point for file watchers
    pub async fn reload(&self) -> Result<BootstrapReport, PlaneError> {
        self.reload_at(unix_now()).await
    }

    pub async fn reload_at(&self, now: i64) -> Result<BootstrapReport, PlaneError> {
        Ok(self.bootstrap.run_at(BootstrapMode::Reload, now).await?)
    }

    /// Authorize a claim against explicit task requirements
    pub async fn authorize(
        &self,
        claim: &SignedAccessKeyClaim,
        required: &BTreeMap<String, Permission>,
    ) -> Result<AuthorizedOwner, PlaneError> {
        Ok(self.trust.authorize(claim, required).await?)
    }

    /// Authorize a claim and load its owner's chain
    pub async fn load_chain(&self, claim: &SignedAccessKeyClaim) -> Result<ChainLoad, PlaneError> {
        self.load_chain_at(claim, unix_now()).await
    }

    pub async fn load_chain_at(&self, claim: &SignedAccessKeyClaim, now: i64) -> Result<ChainLoad, PlaneError> {
        Ok(self.loader.load_at(claim, now).await?)
    }
}
