//! Freshness window for `issued_at`.
//!
//! A TAM is fresh when `issued_at <= now + future_skew` and
//! `issued_at >= now - ttl`. Both bounds are inclusive and compared at full
//! clock precision; the ages in errors are whole seconds.

use chrono::{DateTime, Duration, Utc};

use crate::error::BrokerError;

/// Default TAM time-to-live.
pub const DEFAULT_TTL_SECS: u64 = 600;

/// Default tolerance for clocks running ahead of the verifier.
pub const DEFAULT_FUTURE_SKEW_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreshnessError {
    #[error("tam_expired (age={age_secs}s, ttl={ttl_secs}s)")]
    Expired { age_secs: i64, ttl_secs: i64 },

    #[error("tam_from_future (ahead={ahead_secs}s, tolerance={skew_secs}s)")]
    FromFuture { ahead_secs: i64, skew_secs: i64 },
}

impl From<FreshnessError> for BrokerError {
    fn from(err: FreshnessError) -> Self {
        match err {
            FreshnessError::Expired { age_secs, ttl_secs } => {
                Self::TamExpired { age_secs, ttl_secs }
            }
            FreshnessError::FromFuture {
                ahead_secs,
                skew_secs,
            } => Self::TamFromFuture {
                ahead_secs,
                skew_secs,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    ttl_secs: i64,
    future_skew_secs: i64,
}

impl FreshnessWindow {
    pub fn new(ttl_secs: u64, future_skew_secs: u64) -> Self {
        Self {
            ttl_secs: clamp_secs(ttl_secs),
            future_skew_secs: clamp_secs(future_skew_secs),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn future_skew_secs(&self) -> i64 {
        self.future_skew_secs
    }

    /// Total span during which one `message_id` can be accepted.
    pub fn span_secs(&self) -> u64 {
        (self.ttl_secs + self.future_skew_secs).unsigned_abs()
    }

    pub fn check(&self, issued_at: DateTime<Utc>) -> Result<(), FreshnessError> {
        self.check_at(issued_at, Utc::now())
    }

    pub fn check_at(
        &self,
        issued_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), FreshnessError> {
        let age = now - issued_at;

        if age > Duration::seconds(self.ttl_secs) {
            return Err(FreshnessError::Expired {
                age_secs: age.num_seconds(),
                ttl_secs: self.ttl_secs,
            });
        }
        if age < -Duration::seconds(self.future_skew_secs) {
            return Err(FreshnessError::FromFuture {
                ahead_secs: -age.num_seconds(),
                skew_secs: self.future_skew_secs,
            });
        }
        Ok(())
    }
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS, DEFAULT_FUTURE_SKEW_SECS)
    }
}

// Largest span `chrono::Duration::seconds` accepts without panicking.
const MAX_WINDOW_SECS: i64 = i64::MAX / 1_000;

fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).map_or(MAX_WINDOW_SECS, |s| s.min(MAX_WINDOW_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_boundaries() {
        let window = FreshnessWindow::default();
        let now = fixed_now();

        assert!(window.check_at(now, now).is_ok());
        assert!(window.check_at(now - Duration::seconds(600), now).is_ok());
        assert!(window.check_at(now + Duration::seconds(59), now).is_ok());
        assert!(window.check_at(now + Duration::seconds(60), now).is_ok());

        assert_eq!(
            window.check_at(now - Duration::seconds(601), now),
            Err(FreshnessError::Expired {
                age_secs: 601,
                ttl_secs: 600
            })
        );
        assert_eq!(
            window.check_at(now + Duration::seconds(61), now),
            Err(FreshnessError::FromFuture {
                ahead_secs: 61,
                skew_secs: 60
            })
        );
    }

    #[test]
    fn test_fraction_of_a_second_past_a_bound_is_rejected() {
        let window = FreshnessWindow::default();
        let issued = fixed_now();

        let late = issued + Duration::seconds(600) + Duration::milliseconds(900);
        assert_eq!(
            window.check_at(issued, late),
            Err(FreshnessError::Expired {
                age_secs: 600,
                ttl_secs: 600
            })
        );

        let early = issued - Duration::seconds(60) - Duration::milliseconds(900);
        assert_eq!(
            window.check_at(issued, early),
            Err(FreshnessError::FromFuture {
                ahead_secs: 60,
                skew_secs: 60
            })
        );

        let just_inside = issued + Duration::seconds(599) + Duration::milliseconds(999);
        assert!(window.check_at(issued, just_inside).is_ok());
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let window = FreshnessWindow::new(u64::MAX, u64::MAX);
        let now = fixed_now();
        assert!(window.check_at(now - Duration::days(3650), now).is_ok());
        assert!(window.check_at(now + Duration::days(3650), now).is_ok());
    }

    #[test]
    fn test_tunable_window() {
        let window = FreshnessWindow::new(30, 0);
        let now = fixed_now();
        assert!(window.check_at(now - Duration::seconds(31), now).is_err());
        assert!(window.check_at(now + Duration::seconds(1), now).is_err());
        assert_eq!(window.span_secs(), 30);
    }

    #[test]
    fn test_converts_to_broker_error() {
        let err: BrokerError = FreshnessError::FromFuture {
            ahead_secs: 300,
            skew_secs: 60,
        }
        .into();
        assert_eq!(err.reason_code(), "tam_from_future");
        assert_eq!(err.status_code(), 403);
    }
}
