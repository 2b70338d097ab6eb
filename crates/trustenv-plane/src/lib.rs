//! Trustenv Plane
//!
//! Runtime side of the signed environment store:
//!
//! - **Store**: named, independently locked environment segments with
//!   copy-in/copy-out isolation
//! - **Key registry**: owner id to public key, first-writer-wins, bounded
//!   compare-and-swap updates
//! - **Trust chain**: whitelist lookup, owner key resolution, claim signature,
//!   content address binding, dual-signed access grant, task permissions
//! - **Loader**: root-of-trust bootstrap and the ordered owner chain
//!   (path, task, rest, func, func-error), committed all-or-nothing
//! - **Validation**: deep structural checks with aggregate reports
//!
//! ## Bootstrap layout
//!
//! Relative to `TRUSTENV_ROOT`:
//!
//! - `environments/data/system-pub-key.cbor`
//! - `environments/data/whitelist-env.cbor`
//! - `environments/data/main-env.cbor`
//!
//! Owner chain segments live under the directory named by the
//! `external-env-base-path` entry of `main`, access grants under
//! `access-data-path`.

pub mod access;
pub mod config;
pub mod error;
pub mod keys;
pub mod loader;
pub mod plane;
pub mod source;
pub mod store;
pub mod validation;

pub use access::{AuthorizedOwner, TrustChain, VerifiedClaim};
pub use config::PlaneConfig;
pub use error::{ChainError, ErrorClass, PlaneError};
pub use keys::{KeyRegistry, RegistryError, SYSTEM_OWNER};
pub use loader::{
    Bootstrap, BootstrapMode, BootstrapReport, ChainLoad, ChainLoader, ChainStage, ChainTable,
    StageSpec, Successor,
};
pub use plane::Plane;
pub use source::{FileSource, Location, MemorySource, SegmentSource, SourceError};
pub use store::{ByteSegment, SegmentStore, StoreError, WhitelistSegment};
pub use validation::{validate, LifecycleMode, ShapeError, Validate, ValidationReport};
