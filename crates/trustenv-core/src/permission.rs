//! Permission bitmask and task authorization

use crate::error::{Error, Result};
use crate::status::{unix_now, validate_live_record_at};
use crate::types::PermissionGrant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// A set of independent capability bits
///
/// Bit 0 is unassigned: the first capability is `1 << 1`. Stored grants
/// depend on these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1 << 1);
    pub const WRITE: Permission = Permission(1 << 2);
    pub const RUN: Permission = Permission(1 << 3);
    pub const BRIDGE: Permission = Permission(1 << 4);
    pub const SWAP: Permission = Permission(1 << 5);

    pub const RW: Permission = Permission(Self::READ.0 | Self::WRITE.0);
    pub const RWS: Permission = Permission(Self::RW.0 | Self::SWAP.0);
    pub const RWB: Permission = Permission(Self::RW.0 | Self::BRIDGE.0);
    pub const RWSB: Permission = Permission(Self::RWS.0 | Self::BRIDGE.0);

    /// Construct from raw bits
    pub const fn from_bits(bits: u8) -> Self {
        Permission(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when at least one bit is shared
    pub const fn intersects(self, other: Permission) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every bit of `other` is present
    pub const fn contains_all(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl BitAnd for Permission {
    type Output = Permission;

    fn bitand(self, rhs: Permission) -> Permission {
        Permission(self.0 & rhs.0)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Permission, char); 5] = [
            (Permission::READ, 'r'),
            (Permission::WRITE, 'w'),
            (Permission::RUN, 'x'),
            (Permission::BRIDGE, 'b'),
            (Permission::SWAP, 's'),
        ];
        for (bit, name) in NAMES {
            let c = if self.intersects(bit) { name } else { '-' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Check every required `(task, bits)` pair against the granted permissions at `now`.
///
/// A task is authorized when the grant exists, shares at least one bit with
/// the requirement and its status window is live.
pub fn check_task_authorization_at(
    granted: &BTreeMap<String, PermissionGrant>,
    required: &BTreeMap<String, Permission>,
    now: i64,
) -> Result<()> {
    for (task, needed) in required {
        let grant = granted.get(task).ok_or_else(|| Error::InvalidTaskAuthn {
            task: task.clone(),
            reason: "task not granted".into(),
        })?;

        if !grant.permission.intersects(*needed) {
            return Err(Error::InvalidTaskAuthn {
                task: task.clone(),
                reason: format!("granted {} shares no bit with required {}", grant.permission, needed),
            });
        }

        validate_live_record_at(&grant.status, now).map_err(|e| Error::InvalidTaskAuthn {
            task: task.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// [`check_task_authorization_at`] against the wall clock
pub fn check_task_authorization(
    granted: &BTreeMap<String, PermissionGrant>,
    required: &BTreeMap<String, Permission>,
) -> Result<()> {
    check_task_authorization_at(granted, required, unix_now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusWindow;

    const NOW: i64 = 1_700_000_000;

    fn granted(task: &str, permission: Permission) -> BTreeMap<String, PermissionGrant> {
        let mut map = BTreeMap::new();
        map.insert(
            task.to_string(),
            PermissionGrant {
                permission,
                status: StatusWindow::active_from(NOW - 60, "grant"),
            },
        );
        map
    }

    fn required(task: &str, permission: Permission) -> BTreeMap<String, Permission> {
        let mut map = BTreeMap::new();
        map.insert(task.to_string(), permission);
        map
    }

    #[test]
    fn test_presets() {
        assert_eq!(Permission::READ.bits(), 2);
        assert_eq!(Permission::SWAP.bits(), 32);
        assert_eq!(Permission::RW.bits(), 6);
        assert_eq!(Permission::RWS.bits(), 38);
        assert_eq!(Permission::RWB.bits(), 22);
        assert_eq!(Permission::RWSB.bits(), 54);
        assert_eq!(Permission::READ | Permission::WRITE, Permission::RW);
        assert!(Permission::RWSB.contains_all(Permission::RWS));
        assert!(!Permission::RW.contains_all(Permission::RWS));
        assert_eq!(Permission::RWB.to_string(), "rw-b-");
    }

    #[test]
    fn test_any_overlap_authorizes() {
        let granted = granted("read-config", Permission::READ);
        assert!(check_task_authorization_at(
            &granted,
            &required("read-config", Permission::READ | Permission::WRITE),
            NOW
        )
        .is_ok());
    }

    #[test]
    fn test_disjoint_bits_denied() {
        let granted = granted("read-config", Permission::READ);
        let err = check_task_authorization_at(
            &granted,
            &required("read-config", Permission::WRITE),
            NOW,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTaskAuthn { ref task, .. } if task == "read-config"));
    }

    #[test]
    fn test_missing_task_denied() {
        let granted = granted("read-config", Permission::RWSB);
        let err = check_task_authorization_at(&granted, &required("deploy", Permission::RUN), NOW)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTaskAuthn { ref task, .. } if task == "deploy"));
    }

    #[test]
    fn test_expired_grant_denied() {
        let mut granted = granted("read-config", Permission::READ);
        if let Some(grant) = granted.get_mut("read-config") {
            grant.status.expires_at = NOW - 1;
        }
        assert!(check_task_authorization_at(
            &granted,
            &required("read-config", Permission::READ),
            NOW
        )
        .is_err());
    }

    #[test]
    fn test_empty_requirement_passes() {
        let granted = granted("read-config", Permission::READ);
        assert!(check_task_authorization_at(&granted, &BTreeMap::new(), NOW).is_ok());
    }
}
