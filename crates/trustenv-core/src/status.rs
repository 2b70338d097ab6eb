//! Status window and lifecycle validation
//!
//! Every stateful record carries a [`StatusWindow`]. Before any stored or
//! incoming record is trusted it must pass one of two validators:
//!
//! - **new** mode for records being ingested right now: activation must not
//!   lie in the past
//! - **live** mode for records already in use: activation must have happened
//!
//! Both modes reject inactive, expired and undescribed records. The `_at`
//! variants take the validation instant explicitly and are pure; the plain
//! variants read the wall clock.

use crate::codec::int_keyed;
use crate::error::LifecycleError;
use chrono::Utc;

/// Activation metadata attached to every stateful record
///
/// Field numbering: 1 active, 2 created_at, 3 active_at, 4 expires_at,
/// 5 updated_at, 6 description. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusWindow {
    pub active: bool,
    pub created_at: i64,
    pub active_at: i64,
    /// `0` means the record never expires
    pub expires_at: i64,
    pub updated_at: i64,
    pub description: String,
}

int_keyed!(StatusWindow {
    1 => active: bool,
    2 => created_at: i64,
    3 => active_at: i64,
    4 => expires_at: i64,
    5 => updated_at: i64,
    6 => description: String,
});

impl StatusWindow {
    /// Active window starting at `active_at`, never expiring
    pub fn active_from(active_at: i64, description: impl Into<String>) -> Self {
        Self {
            active: true,
            created_at: active_at,
            active_at,
            expires_at: 0,
            updated_at: active_at,
            description: description.into(),
        }
    }

    /// Set an expiry instant
    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Set the active flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether the window carries an expiry
    pub fn expires(&self) -> bool {
        self.expires_at != 0
    }

    fn check_common(&self, now: i64) -> Result<(), LifecycleError> {
        if !self.active {
            return Err(LifecycleError::Inactive);
        }
        if self.expires() && now > self.expires_at {
            return Err(LifecycleError::Expired {
                expires_at: self.expires_at,
            });
        }
        Ok(())
    }
}

/// Current Unix time in seconds
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Validate a freshly ingested record at `now`
///
/// Activation at exactly `now` is accepted.
pub fn validate_new_record_at(window: &StatusWindow, now: i64) -> Result<(), LifecycleError> {
    window.check_common(now)?;
    if now > window.active_at {
        return Err(LifecycleError::RetroactiveActivation {
            active_at: window.active_at,
            now,
        });
    }
    if window.description.is_empty() {
        return Err(LifecycleError::MissingDescription);
    }
    Ok(())
}

/// Validate a record already in use at `now`
pub fn validate_live_record_at(window: &StatusWindow, now: i64) -> Result<(), LifecycleError> {
    window.check_common(now)?;
    if now < window.active_at {
        return Err(LifecycleError::NotYetActive {
            active_at: window.active_at,
        });
    }
    if window.description.is_empty() {
        return Err(LifecycleError::MissingDescription);
    }
    Ok(())
}

/// [`validate_new_record_at`] against the wall clock
pub fn validate_new_record(window: &StatusWindow) -> Result<(), LifecycleError> {
    validate_new_record_at(window, unix_now())
}

/// [`validate_live_record_at`] against the wall clock
pub fn validate_live_record(window: &StatusWindow) -> Result<(), LifecycleError> {
    validate_live_record_at(window, unix_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_live_record_accepted() {
        let window = StatusWindow::active_from(NOW - 10, "live");
        assert_eq!(validate_live_record_at(&window, NOW), Ok(()));

        // Activation at exactly now counts as active
        let window = StatusWindow::active_from(NOW, "boundary");
        assert_eq!(validate_live_record_at(&window, NOW), Ok(()));
    }

    #[test]
    fn test_live_record_not_yet_active() {
        let window = StatusWindow::active_from(NOW + 1, "future");
        assert_eq!(
            validate_live_record_at(&window, NOW),
            Err(LifecycleError::NotYetActive { active_at: NOW + 1 })
        );
    }

    #[test]
    fn test_new_record_boundaries() {
        // Scheduled in the future
        let window = StatusWindow::active_from(NOW + 60, "scheduled");
        assert_eq!(validate_new_record_at(&window, NOW), Ok(()));

        // Activation exactly now
        let window = StatusWindow::active_from(NOW, "immediate");
        assert_eq!(validate_new_record_at(&window, NOW), Ok(()));

        // One second in the past is retroactive
        let window = StatusWindow::active_from(NOW - 1, "retroactive");
        assert_eq!(
            validate_new_record_at(&window, NOW),
            Err(LifecycleError::RetroactiveActivation {
                active_at: NOW - 1,
                now: NOW
            })
        );
    }

    #[test]
    fn test_inactive_rejected_in_both_modes() {
        let window = StatusWindow::active_from(NOW, "off").with_active(false);
        assert_eq!(validate_live_record_at(&window, NOW), Err(LifecycleError::Inactive));
        assert_eq!(validate_new_record_at(&window, NOW), Err(LifecycleError::Inactive));
    }

    #[test]
    fn test_expiry() {
        let window = StatusWindow::active_from(NOW - 100, "expiring").with_expiry(NOW - 1);
        assert_eq!(
            validate_live_record_at(&window, NOW),
            Err(LifecycleError::Expired { expires_at: NOW - 1 })
        );

        // Expiry at exactly now is still valid
        let window = StatusWindow::active_from(NOW - 100, "expiring").with_expiry(NOW);
        assert_eq!(validate_live_record_at(&window, NOW), Ok(()));

        // Zero means never
        let window = StatusWindow::active_from(0, "forever");
        assert_eq!(validate_live_record_at(&window, i64::MAX), Ok(()));
    }

    #[test]
    fn test_missing_description() {
        let window = StatusWindow::active_from(NOW, "");
        assert_eq!(
            validate_live_record_at(&window, NOW),
            Err(LifecycleError::MissingDescription)
        );
        assert_eq!(
            validate_new_record_at(&window, NOW),
            Err(LifecycleError::MissingDescription)
        );
    }

    #[test]
    fn test_wall_clock_wrappers() {
        let window = StatusWindow::active_from(unix_now() - 5, "wall clock");
        assert!(validate_live_record(&window).is_ok());
        assert!(validate_new_record(&window).is_err());
    }
}
