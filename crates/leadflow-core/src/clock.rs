//! Time source and timestamp encoding.
//!
//! Engines never call `Utc::now()` directly: they ask a [`Clock`], so tests can
//! pin "now" and roll rate-limit windows or days-in-status forward without
//! sleeping.
//!
//! Persisted timestamps are RFC 3339 UTC strings with millisecond precision
//! and a `Z` suffix. The fixed width keeps lexicographic and chronological
//! order identical, which the trailing-window counts in SQL rely on.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::errors::{CoreError, Result};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Encode an instant for storage.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored instant.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CoreError::InvalidTimestamp(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap()
    }

    #[test]
    fn manual_clock_is_frozen_until_advanced() {
        let clock = ManualClock::new(t0());
        assert_eq!(clock.now(), t0());
        clock.advance(Duration::minutes(61));
        assert_eq!(clock.now(), t0() + Duration::minutes(61));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(t0());
        let other = clock.clone();
        clock.set(t0() + Duration::days(2));
        assert_eq!(other.now(), t0() + Duration::days(2));
    }

    #[test]
    fn format_is_fixed_width_utc() {
        assert_eq!(format_ts(t0()), "2024-03-04T09:30:00.000Z");
    }

    #[test]
    fn parse_round_trips() {
        let s = format_ts(t0() + Duration::milliseconds(123));
        assert_eq!(parse_ts(&s).unwrap(), t0() + Duration::milliseconds(123));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_ts("not a time").is_err());
    }

    #[test]
    fn lexicographic_order_matches_time_order() {
        let earlier = format_ts(t0());
        let later = format_ts(t0() + Duration::milliseconds(1));
        assert!(earlier < later);
    }
}
