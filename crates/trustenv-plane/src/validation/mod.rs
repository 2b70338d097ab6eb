//! Deep structural validation
//!
//! Walks stored or incoming values and reports every shape violation in one
//! pass. Shapes are recognized by static type through [`Validate`]; there is
//! no field probing. Dynamic CBOR values are covered by the
//! `ciborium::Value` implementation.
//!
//! Checks performed:
//! - map keys are not blank
//! - optional values are present (`None` is rejected)
//! - every record carries a status window, and it is well formed
//! - content addresses, when present, are valid CIDv1/dag-cbor/sha2-256
//! - dynamic values use only recognized kinds

use ciborium::Value;
use serde_bytes::ByteBuf;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;
use trustenv_core::{
    content_address::validate_content_address_bytes, validate_live_record_at,
    validate_new_record_at, AccessGrant, AccessKeyClaim, AuthnRecord, EnvSegment, EnvValue,
    FieldDescriptor, LifecycleError, Permission, PermissionGrant, PublicKeyRecord, SignedBlob,
    SignedEnvSegment, StatusWindow, TokenData, WhitelistEntry,
};

/// A single shape violation, tagged with the path it was found at
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("{path}: unsupported value kind '{kind}'")]
    UnsupportedKind { path: String, kind: String },

    #[error("{path}: status window is missing")]
    MissingStatus { path: String },

    #[error("{path}: invalid status window: {reason}")]
    InvalidStatus { path: String, reason: String },

    #[error("{path}: invalid map key")]
    InvalidMapKey { path: String },

    #[error("{path}: invalid value: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("{path}: nil value not allowed")]
    NilNotAllowed { path: String },

    #[error("{path}: {source}")]
    Lifecycle {
        path: String,
        #[source]
        source: LifecycleError,
    },
}

impl ShapeError {
    /// Path of the offending value
    pub fn path(&self) -> &str {
        match self {
            ShapeError::UnsupportedKind { path, .. }
            | ShapeError::MissingStatus { path }
            | ShapeError::InvalidStatus { path, .. }
            | ShapeError::InvalidMapKey { path }
            | ShapeError::InvalidValue { path, .. }
            | ShapeError::NilNotAllowed { path }
            | ShapeError::Lifecycle { path, .. } => path,
        }
    }
}

/// Aggregate validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// Every violation, in discovery order
    pub errors: Vec<ShapeError>,
    /// Violations grouped by path
    pub by_path: BTreeMap<String, Vec<ShapeError>>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            by_path: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, error: ShapeError) {
        self.is_valid = false;
        self.by_path
            .entry(error.path().to_string())
            .or_default()
            .push(error.clone());
        self.errors.push(error);
    }

    /// Errors recorded at exactly `path`
    pub fn at(&self, path: &str) -> &[ShapeError] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A value whose structure can be checked
pub trait Validate {
    /// Record every violation under `path` into `report`
    fn validate_into(&self, path: &str, report: &mut ValidationReport);
}

/// Validate `value`, naming its root `root`
pub fn validate<T: Validate + ?Sized>(value: &T, root: &str) -> ValidationReport {
    let mut report = ValidationReport::new();
    value.validate_into(root, &mut report);
    if !report.is_valid {
        warn!(
            root = %root,
            errors = report.errors.len(),
            "Deep validation found violations"
        );
    }
    report
}

fn child(path: &str, field: &str) -> String {
    format!("{path}.{field}")
}

fn indexed(path: &str, index: impl std::fmt::Display) -> String {
    format!("{path}[{index}]")
}

// =============================================================================
// Primitives and containers
// =============================================================================

macro_rules! always_valid {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Validate for $ty {
                fn validate_into(&self, _path: &str, _report: &mut ValidationReport) {}
            }
        )+
    };
}

always_valid!(bool, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, String, ByteBuf);

impl Validate for Permission {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if self.bits() & !Permission::RWSB.bits() & !Permission::RUN.bits() != 0 {
            report.push(ShapeError::InvalidValue {
                path: path.to_string(),
                reason: format!("unknown permission bits {:#04x}", self.bits()),
            });
        }
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        for (i, item) in self.iter().enumerate() {
            item.validate_into(&indexed(path, i), report);
        }
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        match self {
            Some(value) => value.validate_into(path, report),
            None => report.push(ShapeError::NilNotAllowed {
                path: path.to_string(),
            }),
        }
    }
}

/// Types usable as map keys in validated structures
pub trait MapKey {
    /// Rendering used in report paths
    fn render(&self) -> String;

    /// Whether the key counts as empty
    fn is_blank(&self) -> bool {
        false
    }
}

impl MapKey for String {
    fn render(&self) -> String {
        format!("{self:?}")
    }

    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

macro_rules! int_map_key {
    ($($ty:ty),+) => {
        $(
            impl MapKey for $ty {
                fn render(&self) -> String {
                    self.to_string()
                }
            }
        )+
    };
}

int_map_key!(u8, u16, u32, u64, i32, i64);

impl<K: MapKey, V: Validate> Validate for BTreeMap<K, V> {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        for (key, value) in self {
            let entry_path = indexed(path, key.render());
            if key.is_blank() {
                report.push(ShapeError::InvalidMapKey { path: entry_path });
                continue;
            }
            value.validate_into(&entry_path, report);
        }
    }
}

// =============================================================================
// Data model
// =============================================================================

impl Validate for StatusWindow {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if *self == StatusWindow::default() {
            report.push(ShapeError::MissingStatus {
                path: path.to_string(),
            });
            return;
        }
        if self.description.trim().is_empty() {
            report.push(ShapeError::InvalidStatus {
                path: path.to_string(),
                reason: "description is empty".into(),
            });
        }
        if self.expires() && self.expires_at < self.active_at {
            report.push(ShapeError::InvalidStatus {
                path: path.to_string(),
                reason: format!(
                    "expires at {} before activating at {}",
                    self.expires_at, self.active_at
                ),
            });
        }
    }
}

impl Validate for FieldDescriptor {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if !self.content_address.is_empty() {
            if let Err(e) = validate_content_address_bytes(&self.content_address) {
                report.push(ShapeError::InvalidValue {
                    path: child(path, "content_address"),
                    reason: e.to_string(),
                });
            }
        }
        // Descriptor status is optional metadata
        if self.status != StatusWindow::default() {
            self.status.validate_into(&child(path, "status"), report);
        }
    }
}

impl Validate for SignedBlob {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if self.signer_id.trim().is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(path, "signer_id"),
                reason: "signer id is empty".into(),
            });
        }
        if self.signature.is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(path, "signature"),
                reason: "signature is empty".into(),
            });
        }
    }
}

impl Validate for PublicKeyRecord {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if self.public_key.is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(path, "public_key"),
                reason: "public key is empty".into(),
            });
        }
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl<V: Validate> Validate for EnvValue<V> {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        self.value.validate_into(&child(path, "value"), report);
        self.field.validate_into(&child(path, "field"), report);
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl<K: MapKey, V: Validate> Validate for EnvSegment<K, V> {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        self.entries.validate_into(&child(path, "entries"), report);
        self.field.validate_into(&child(path, "field"), report);
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl<K: MapKey, V: Validate> Validate for SignedEnvSegment<K, V> {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        self.segment.validate_into(&child(path, "segment"), report);
        self.signature.validate_into(&child(path, "signature"), report);
    }
}

impl Validate for WhitelistEntry {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if self.owner_key_locator.trim().is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(path, "owner_key_locator"),
                reason: "key locator is empty".into(),
            });
        }
        if let Err(e) = validate_content_address_bytes(&self.access_grant_address) {
            report.push(ShapeError::InvalidValue {
                path: child(path, "access_grant_address"),
                reason: e.to_string(),
            });
        }
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl Validate for AccessKeyClaim {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if self.whitelist_key.trim().is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(path, "whitelist_key"),
                reason: "whitelist key is empty".into(),
            });
        }
        if let Err(e) = validate_content_address_bytes(&self.access_grant_address) {
            report.push(ShapeError::InvalidValue {
                path: child(path, "access_grant_address"),
                reason: e.to_string(),
            });
        }
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl Validate for PermissionGrant {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        if self.permission.is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(path, "permission"),
                reason: "no permission bits set".into(),
            });
        } else {
            self.permission
                .validate_into(&child(path, "permission"), report);
        }
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl Validate for AuthnRecord {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        self.permissions
            .validate_into(&child(path, "permissions"), report);
        self.field.validate_into(&child(path, "field"), report);
        self.status.validate_into(&child(path, "status"), report);
    }
}

impl Validate for AccessGrant {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        self.authn.validate_into(&child(path, "authn"), report);
        self.task_signature
            .validate_into(&child(path, "task_signature"), report);
        self.authn_signature
            .validate_into(&child(path, "authn_signature"), report);
    }
}

impl Validate for TokenData {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        self.field.validate_into(&child(path, "field"), report);
        self.status.validate_into(&child(path, "status"), report);
    }
}

// =============================================================================
// Dynamic values
// =============================================================================

impl Validate for Value {
    fn validate_into(&self, path: &str, report: &mut ValidationReport) {
        match self {
            Value::Integer(_) | Value::Bytes(_) | Value::Float(_) | Value::Text(_) | Value::Bool(_) => {}
            Value::Null => report.push(ShapeError::NilNotAllowed {
                path: path.to_string(),
            }),
            Value::Tag(tag, _) => report.push(ShapeError::UnsupportedKind {
                path: path.to_string(),
                kind: format!("tag({tag})"),
            }),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.validate_into(&indexed(path, i), report);
                }
            }
            Value::Map(pairs) => {
                let mut seen = BTreeSet::new();
                for (key, value) in pairs {
                    let rendered = match key {
                        Value::Text(text) if !text.trim().is_empty() => format!("{text:?}"),
                        Value::Integer(int) => i128::from(*int).to_string(),
                        _ => {
                            report.push(ShapeError::InvalidMapKey {
                                path: indexed(path, "?"),
                            });
                            continue;
                        }
                    };
                    let entry_path = indexed(path, &rendered);
                    if !seen.insert(rendered) {
                        report.push(ShapeError::InvalidMapKey { path: entry_path });
                        continue;
                    }
                    value.validate_into(&entry_path, report);
                }
            }
            #[allow(unreachable_patterns)]
            _ => report.push(ShapeError::UnsupportedKind {
                path: path.to_string(),
                kind: "unknown".into(),
            }),
        }
    }
}

// =============================================================================
// External segments
// =============================================================================

/// Which lifecycle validator applies to a batch of records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMode {
    /// Freshly ingested: activation must not be retroactive
    New,
    /// Already in use: activation must have happened
    Live,
}

impl LifecycleMode {
    pub fn check(self, window: &StatusWindow, now: i64) -> Result<(), LifecycleError> {
        match self {
            LifecycleMode::New => validate_new_record_at(window, now),
            LifecycleMode::Live => validate_live_record_at(window, now),
        }
    }
}

/// Validate an externally supplied byte segment at `now`
///
/// Lifecycle of the segment and of every entry under `mode`, non-empty keys
/// and byte values, then the full structural walk.
pub fn validate_external_segment_at(
    segment: &EnvSegment<String, EnvValue<ByteBuf>>,
    root: &str,
    now: i64,
    mode: LifecycleMode,
) -> ValidationReport {
    let mut report = ValidationReport::new();

    if let Err(source) = mode.check(&segment.status, now) {
        report.push(ShapeError::Lifecycle {
            path: child(root, "status"),
            source,
        });
    }

    let entries = child(root, "entries");
    for (key, value) in &segment.entries {
        let entry_path = indexed(&entries, key.render());
        if key.is_blank() {
            continue;
        }
        if value.value.is_empty() {
            report.push(ShapeError::InvalidValue {
                path: child(&entry_path, "value"),
                reason: "value is empty".into(),
            });
        }
        if let Err(source) = mode.check(&value.status, now) {
            report.push(ShapeError::Lifecycle {
                path: child(&entry_path, "status"),
                source,
            });
        }
    }

    segment.validate_into(root, &mut report);

    if !report.is_valid {
        warn!(
            segment = %root,
            errors = report.errors.len(),
            "SECURITY: Rejected external segment"
        );
    }
    report
}

/// [`validate_external_segment_at`] against the wall clock
pub fn validate_external_segment(
    segment: &EnvSegment<String, EnvValue<ByteBuf>>,
    root: &str,
    mode: LifecycleMode,
) -> ValidationReport {
    validate_external_segment_at(segment, root, trustenv_core::unix_now(), mode)
}
