//! Advisory shift lock.
//!
//! Assigning a user to a shift position stamps `locked_at`. For the next
//! [`LOCK_WINDOW_MINUTES`] minutes a plain user cannot take the position over
//! or clear it on behalf of the holder. Backoffice users are exempt.
//!
//! The lock is a hint against two people claiming the same slot from stale
//! screens. It is not a mutual exclusion primitive; the shift update guards
//! the write itself by re-checking the previously observed holder.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{Error, Result};

pub const LOCK_WINDOW_MINUTES: i64 = 5;

/// Current occupant of a shift position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub user_id: Uuid,
    pub locked_at: Option<DateTime<Utc>>,
}

/// Whether a lock stamped at `locked_at` is still fresh at `now`.
pub fn is_recent(locked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - locked_at < Duration::minutes(LOCK_WINDOW_MINUTES)
}

/// Check whether `actor` may replace `current` with `new_user`.
///
/// Returns `Conflict` when another user claimed the position within the lock window.
pub fn check_claim(
    current: Option<Holder>,
    actor: Uuid,
    new_user: Option<Uuid>,
    privileged: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    if privileged {
        return Ok(());
    }

    let Some(holder) = current else {
        return Ok(());
    };

    if holder.user_id == actor || Some(holder.user_id) == new_user {
        return Ok(());
    }

    match holder.locked_at {
        Some(locked_at) if is_recent(locked_at, now) => {
            let remaining = Duration::minutes(LOCK_WINDOW_MINUTES) - (now - locked_at);
            Err(Error::Conflict(format!(
                "Position was claimed recently by another user; try again in {} seconds",
                remaining.num_seconds().max(1)
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minutes_ago: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(now - Duration::minutes(minutes_ago))
    }

    #[test]
    fn test_empty_position_is_free() {
        let now = Utc::now();
        let me = Uuid::new_v4();
        assert!(check_claim(None, me, Some(me), false, now).is_ok());
    }

    #[test]
    fn test_recent_claim_by_other_conflicts() {
        let now = Utc::now();
        let me = Uuid::new_v4();
        let other = Holder {
            user_id: Uuid::new_v4(),
            locked_at: at(2, now),
        };

        let err = check_claim(Some(other), me, Some(me), false, now).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Clearing someone else's fresh claim is blocked as well.
        assert!(check_claim(Some(other), me, None, false, now).is_err());
    }

    #[test]
    fn test_stale_claim_can_be_taken_over() {
        let now = Utc::now();
        let me = Uuid::new_v4();
        let other = Holder {
            user_id: Uuid::new_v4(),
            locked_at: at(LOCK_WINDOW_MINUTES, now),
        };
        assert!(check_claim(Some(other), me, Some(me), false, now).is_ok());

        let unlocked = Holder {
            user_id: other.user_id,
            locked_at: None,
        };
        assert!(check_claim(Some(unlocked), me, Some(me), false, now).is_ok());
    }

    #[test]
    fn test_holder_may_release_own_claim() {
        let now = Utc::now();
        let me = Uuid::new_v4();
        let mine = Holder {
            user_id: me,
            locked_at: at(0, now),
        };
        assert!(check_claim(Some(mine), me, None, false, now).is_ok());
    }

    #[test]
    fn test_backoffice_overrides_lock() {
        let now = Utc::now();
        let other = Holder {
            user_id: Uuid::new_v4(),
            locked_at: at(1, now),
        };
        assert!(check_claim(Some(other), Uuid::new_v4(), None, true, now).is_ok());
    }

    #[test]
    fn test_window_boundary() {
        let now = Utc::now();
        assert!(is_recent(now - Duration::seconds(299), now));
        assert!(!is_recent(now - Duration::seconds(300), now));
    }
}
