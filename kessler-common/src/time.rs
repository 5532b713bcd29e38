//! Timestamp and backoff utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Initial delay before retrying a lost compare-and-swap
const INITIAL_BACKOFF_MS: u64 = 10;
/// Upper bound for any single backoff sleep
const MAX_BACKOFF_MS: u64 = 1000;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Exponential backoff for the given retry attempt (1-based)
///
/// 10ms, 20ms, 40ms, ... capped at 1000ms.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let millis = INITIAL_BACKOFF_MS.saturating_mul(1u64 << exponent);
    millis_to_duration(millis.min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01, before 2100-01-01
        assert!(timestamp.timestamp() > 946_684_800);
        assert!(timestamp.timestamp() < 4_102_444_800);
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_millis(10));
        assert_eq!(backoff_delay(2), Duration::from_millis(20));
        assert_eq!(backoff_delay(3), Duration::from_millis(40));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(8), Duration::from_millis(1000));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_attempt_zero_treated_as_first() {
        assert_eq!(backoff_delay(0), Duration::from_millis(10));
    }
}
