//! Wall-clock helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Current UTC wall-clock time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Time elapsed between `since` and `now`, saturating at zero when the clock
/// went backwards.
#[must_use]
pub fn elapsed_between(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
