//! Shared fixtures for trust plane integration tests
//!
//! A `World` holds every file a plane reads (system key, whitelist, main,
//! owner key, access grant, chain segments), signed by freshly generated
//! keys. Tests tweak the files, then build a plane over a memory or file
//! source.

#![allow(dead_code)]

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trustenv_core::{
    canonicalize, compute_content_address, derive_whitelist_key, AccessGrant, AccessKeyClaim,
    AuthnRecord, ByteBuf, EnvSegment, EnvValue, FieldDescriptor, Permission, PermissionGrant,
    PublicKeyRecord, SignedAccessKeyClaim, SignedBlob, SignedEnvSegment, StatusWindow,
    WhitelistEntry,
};
use trustenv_plane::{ByteSegment, ChainStage, MemorySource, Plane, PlaneConfig, WhitelistSegment};

/// Bootstrap instant
pub const T0: i64 = 1_900_000_000;
/// Authorization and chain load instant
pub const T1: i64 = T0 + 60;

pub const ALICE_LOCATOR: &str = "/keys/alice.pub";
pub const GRANTS_DIR: &str = "grants";
pub const CHAIN_DIR: &str = "owners/alice";

pub fn whitelist_key() -> String {
    derive_whitelist_key("alice", "s3cret")
}

pub fn keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn window(at: i64, description: &str) -> StatusWindow {
    StatusWindow::active_from(at, description)
}

pub fn sign<T: Serialize + ?Sized>(key: &SigningKey, signer: &str, value: &T) -> SignedBlob {
    let payload = canonicalize(value).unwrap();
    SignedBlob::new(signer, key.sign(&payload).to_bytes().to_vec())
}

pub fn key_record(key: &SigningKey, at: i64) -> PublicKeyRecord {
    PublicKeyRecord::new(key.verifying_key().to_bytes().to_vec(), window(at, "public key"))
}

pub fn byte_segment(entries: &[(&str, &str)], at: i64) -> ByteSegment {
    let mut segment = EnvSegment::new(FieldDescriptor::described("segment", window(at, "segment")), window(at, "segment"));
    for (key, value) in entries {
        segment = segment.with_entry(
            key.to_string(),
            EnvValue::new(
                ByteBuf::from(value.as_bytes().to_vec()),
                FieldDescriptor::default(),
                window(at, "entry"),
            ),
        );
    }
    segment
}

pub fn signed<K, V>(key: &SigningKey, signer: &str, segment: EnvSegment<K, V>) -> SignedEnvSegment<K, V>
where
    EnvSegment<K, V>: Serialize,
{
    let signature = sign(key, signer, &segment);
    SignedEnvSegment { segment, signature }
}

/// Permissions covering the default chain
pub fn full_permissions() -> Vec<(&'static str, Permission)> {
    vec![
        ("inc-path-env-perm", Permission::RW),
        ("inc-task-env-perm", Permission::RWS),
        ("inc-rest-env-perm", Permission::RWB),
        ("inc-func-env-perm", Permission::RWSB),
        ("inc-func-error-env-perm", Permission::RWS),
    ]
}

pub fn grant(owner: &SigningKey, system: &SigningKey, permissions: &[(&str, Permission)], at: i64) -> AccessGrant {
    let permissions: BTreeMap<String, PermissionGrant> = permissions
        .iter()
        .map(|(task, bits)| {
            (
                task.to_string(),
                PermissionGrant {
                    permission: *bits,
                    status: window(at, "task grant"),
                },
            )
        })
        .collect();
    let authn = AuthnRecord {
        permissions,
        field: FieldDescriptor::described("alice grant", window(at, "grant")),
        status: window(at, "authn"),
    };
    AccessGrant {
        task_signature: sign(system, "system", &authn.permissions),
        authn_signature: sign(owner, "alice", &authn),
        authn,
    }
}

/// Entries of each chain stage segment
pub fn stage_entries(stage: ChainStage) -> Vec<(&'static str, &'static str)> {
    match stage {
        ChainStage::Path => vec![("origin", "https://app.example"), ("prefix", "/api")],
        ChainStage::Task => vec![("func-include-env-map-perm", "rw"), ("func-get-env-perm", "r")],
        ChainStage::Rest => vec![("methods", "GET,POST")],
        ChainStage::Func => vec![("handler", "resolve")],
        ChainStage::FuncError => vec![("fallback", "500")],
    }
}

pub struct World {
    pub system: SigningKey,
    pub alice: SigningKey,
    pub config: PlaneConfig,
    pub locator: String,
    pub grant: AccessGrant,
    pub grant_bytes: Vec<u8>,
    pub grant_address: Vec<u8>,
    pub files: BTreeMap<PathBuf, Vec<u8>>,
}

impl World {
    /// World rooted at `/srv/trustenv` with the full permission set
    pub fn new() -> Self {
        Self::build(PlaneConfig::default().with_root("/srv/trustenv"), ALICE_LOCATOR, &full_permissions())
    }

    /// World with a custom grant
    pub fn with_permissions(permissions: &[(&str, Permission)]) -> Self {
        Self::build(PlaneConfig::default().with_root("/srv/trustenv"), ALICE_LOCATOR, permissions)
    }

    /// World rooted at a real directory, every path relative to it
    pub fn rooted_at(root: &Path) -> Self {
        Self::build(PlaneConfig::default().with_root(root), "keys/alice.pub", &full_permissions())
    }

    fn build(config: PlaneConfig, locator: &str, permissions: &[(&str, Permission)]) -> Self {
        let system = keypair();
        let alice = keypair();

        let grant = grant(&alice, &system, permissions, T0);
        let grant_bytes = canonicalize(&grant).unwrap();
        let grant_address = compute_content_address(&grant_bytes).unwrap();

        let mut world = Self {
            system,
            alice,
            config,
            locator: locator.to_string(),
            grant,
            grant_bytes,
            grant_address,
            files: BTreeMap::new(),
        };

        world.put_bootstrap("system-pub-key", canonicalize(&key_record(&world.system, T0)).unwrap());
        let whitelist = world.whitelist(T0);
        world.put_whitelist(&whitelist);
        let main = world.main(T0);
        world.put_main(&main);

        let alice_record = key_record(&world.alice, T0);
        let alice_path = world.config.resolve_specific(Path::new(&world.locator));
        world.files.insert(alice_path, canonicalize(&alice_record).unwrap());

        let grant_path = world.grant_path();
        world.files.insert(grant_path, world.grant_bytes.clone());

        for stage in ChainStage::ALL {
            let segment = byte_segment(&stage_entries(stage), T1);
            world.put_stage(stage, &signed(&world.alice, "alice", segment));
        }
        world
    }

    pub fn whitelist(&self, at: i64) -> WhitelistSegment {
        EnvSegment::new(FieldDescriptor::described("whitelist", window(at, "whitelist")), window(at, "whitelist"))
            .with_entry(
                whitelist_key(),
                WhitelistEntry {
                    owner_key_locator: self.locator.clone(),
                    access_grant_address: ByteBuf::from(self.grant_address.clone()),
                    status: window(at, "alice"),
                },
            )
    }

    pub fn main(&self, at: i64) -> ByteSegment {
        byte_segment(
            &[
                ("access-data-path", GRANTS_DIR),
                ("external-env-base-path", CHAIN_DIR),
                ("owner-whitelist", "enabled"),
            ],
            at,
        )
    }

    pub fn bootstrap_path(&self, stem: &str) -> PathBuf {
        self.config.bootstrap_dir().join(self.config.file_name(stem))
    }

    pub fn put_bootstrap(&mut self, stem: &str, bytes: Vec<u8>) {
        let path = self.bootstrap_path(stem);
        self.files.insert(path, bytes);
    }

    pub fn put_whitelist(&mut self, whitelist: &WhitelistSegment) {
        let signed = signed(&self.system, "system", whitelist.clone());
        self.put_bootstrap("whitelist-env", canonicalize(&signed).unwrap());
    }

    pub fn put_main(&mut self, main: &ByteSegment) {
        let signed = signed(&self.system, "system", main.clone());
        self.put_bootstrap("main-env", canonicalize(&signed).unwrap());
    }

    pub fn grant_path(&self) -> PathBuf {
        let name = trustenv_core::content_address_to_string(&self.grant_address).unwrap();
        self.config
            .resolve_specific(Path::new(GRANTS_DIR))
            .join(self.config.file_name(&name))
    }

    /// Swap in a different grant, rebinding the whitelist to its address
    pub fn replace_grant(&mut self, grant: AccessGrant) {
        let old = self.grant_path();
        self.files.remove(&old);

        self.grant_bytes = canonicalize(&grant).unwrap();
        self.grant_address = compute_content_address(&self.grant_bytes).unwrap();
        self.grant = grant;

        let path = self.grant_path();
        self.files.insert(path, self.grant_bytes.clone());
        let whitelist = self.whitelist(T0);
        self.put_whitelist(&whitelist);
    }

    pub fn stage_path(&self, stage: ChainStage) -> PathBuf {
        self.config
            .resolve_specific(Path::new(CHAIN_DIR))
            .join(self.config.file_name(stage.file_stem()))
    }

    pub fn put_stage(&mut self, stage: ChainStage, segment: &SignedEnvSegment<String, EnvValue<ByteBuf>>) {
        let path = self.stage_path(stage);
        self.files.insert(path, canonicalize(segment).unwrap());
    }

    /// Claim for `address`, signed by `key`
    pub fn claim_with(&self, key: &SigningKey, address: &[u8]) -> SignedAccessKeyClaim {
        let claim = AccessKeyClaim {
            whitelist_key: whitelist_key(),
            access_grant_address: ByteBuf::from(address.to_vec()),
            status: window(T0, "claim"),
        };
        SignedAccessKeyClaim {
            signature: sign(key, "alice", &claim),
            claim,
        }
    }

    /// Alice's honest claim
    pub fn claim(&self) -> SignedAccessKeyClaim {
        self.claim_with(&self.alice, &self.grant_address)
    }

    pub fn memory_source(&self) -> Arc<MemorySource> {
        let source = MemorySource::new();
        for (path, bytes) in &self.files {
            source.insert(path.clone(), bytes.clone());
        }
        Arc::new(source)
    }

    /// Plane over an in-memory copy of the files
    pub fn plane(&self) -> Plane {
        Plane::new(self.config.clone(), self.memory_source())
    }

    /// Plane over a memory source the test keeps a handle to
    pub fn plane_with_source(&self) -> (Plane, Arc<MemorySource>) {
        let source = self.memory_source();
        (Plane::new(self.config.clone(), source.clone()), source)
    }

    /// Plane bootstrapped at `T0`
    pub async fn bootstrapped(&self) -> Plane {
        let plane = self.plane();
        plane.bootstrap_at(T0).await.unwrap();
        plane
    }

    /// Write every file to disk under its path
    pub fn write_all(&self) {
        for (path, bytes) in &self.files {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, bytes).unwrap();
        }
    }
}
