//! Next-run arithmetic for database refreshes.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::config::{DatabaseDescriptor, REFRESH_JITTER_MAX, REFRESH_JITTER_MIN, REFRESH_RETRY_DELAY};

fn chrono_duration(d: std::time::Duration) -> Duration {
    Duration::seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Whether a descriptor needs a refresh at `now`.
///
/// A descriptor without a scheduled run is due. A scheduled run is honored
/// even when the database was never written, so failed first downloads back
/// off like any other.
pub fn is_due(descriptor: &DatabaseDescriptor, now: DateTime<Utc>) -> bool {
    descriptor.next_refresh.is_none_or(|next| now >= next)
}

/// Random offset between one and six days.
pub(crate) fn random_jitter() -> Duration {
    let min = REFRESH_JITTER_MIN.as_secs();
    let max = REFRESH_JITTER_MAX.as_secs();
    chrono_duration(std::time::Duration::from_secs(
        rand::rng().random_range(min..=max),
    ))
}

/// Next run after a 304: full cadence plus jitter.
pub(crate) fn after_not_modified(now: DateTime<Utc>, cadence: Duration, jitter: Duration) -> DateTime<Utc> {
    now + cadence + jitter
}

/// Next run after a successful fetch.
pub(crate) fn after_fetch(now: DateTime<Utc>, cadence: Duration) -> DateTime<Utc> {
    now + cadence
}

/// Next run after a failed attempt.
pub(crate) fn after_error(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono_duration(REFRESH_RETRY_DELAY)
}
