//! Time utilities for burrow
//!
//! The liveness protocol works in whole Unix seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Get the current Unix timestamp in milliseconds.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Age of a Unix-seconds timestamp relative to now.
///
/// Returns Duration::ZERO if the timestamp is in the future.
pub fn age_of(timestamp_secs: u64) -> Duration {
    Duration::from_secs(current_time_secs().saturating_sub(timestamp_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_secs_is_positive() {
        assert!(current_time_secs() > 0);
    }

    #[test]
    fn test_millis_agrees_with_secs() {
        let secs = current_time_secs();
        let millis = current_time_millis();
        assert!(millis / 1000 >= secs);
    }

    #[test]
    fn test_age_of_past_timestamp() {
        let ts = current_time_secs() - 13;
        let age = age_of(ts);
        assert!(age >= Duration::from_secs(13));
        assert!(age < Duration::from_secs(15));
    }

    #[test]
    fn test_age_of_future_timestamp() {
        assert_eq!(age_of(current_time_secs() + 1000), Duration::ZERO);
    }
}
