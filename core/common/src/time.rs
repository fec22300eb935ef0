//! Timestamp helpers.
//!
//! All record timestamps are kept at millisecond precision so a value read
//! back from the database compares equal to the value that was written.

use chrono::{DateTime, Duration, Utc};

/// Timestamp type used for `created_at` / `updated_at`.
pub type Timestamp = DateTime<Utc>;

/// Current time truncated to milliseconds.
pub fn now() -> Timestamp {
    from_millis(Utc::now().timestamp_millis())
}

/// The Unix epoch, used as the pull cursor when nothing is synced yet.
pub fn epoch() -> Timestamp {
    DateTime::UNIX_EPOCH
}

/// Build a timestamp from milliseconds since the epoch.
///
/// Out-of-range values clamp to the epoch.
pub fn from_millis(millis: i64) -> Timestamp {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Next timestamp for a local edit: never earlier than `now`, always after `previous`.
pub fn bump(previous: Timestamp) -> Timestamp {
    let now = now();
    let floor = previous + Duration::milliseconds(1);
    if now > floor {
        now
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_millisecond_precise() {
        let t = now();
        assert_eq!(from_millis(t.timestamp_millis()), t);
    }

    #[test]
    fn test_bump_is_strictly_increasing() {
        let future = now() + Duration::seconds(60);
        let bumped = bump(future);
        assert_eq!(bumped, future + Duration::milliseconds(1));

        let past = from_millis(1_000);
        assert!(bump(past) > past);
    }

    proptest::proptest! {
        #[test]
        fn prop_bump_never_regresses(millis in 0i64..4_102_444_800_000) {
            let previous = from_millis(millis);
            proptest::prop_assert!(bump(previous) > previous);
        }
    }
}
