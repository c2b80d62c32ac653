//! Wall-clock source.
//!
//! Every component that compares against "now" reads it through [`Clock`] so
//! tests can pin or advance time deterministically.

use chrono::{DateTime, Utc};

/// Provides the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Duration from `now` until `at`, zero when `at` is already past.
pub fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> std::time::Duration {
    (at - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn until_is_zero_for_past_instants() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(until(now, past), std::time::Duration::ZERO);
        assert_eq!(until(past, now), std::time::Duration::from_secs(3600));
    }
}
