//! Timer bookkeeping shared by the supervisor and the scheduler.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use tokio::time::Instant;

/// Sleep until `deadline`, or forever when there is none.
///
/// Lets an optional timer sit in a `tokio::select!` arm without a guard.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Delay from `now` to the next wall-clock minute boundary.
///
/// Exactly on a boundary this is zero.
#[must_use]
pub fn until_next_minute(now: DateTime<Utc>) -> StdDuration {
    let into_minute = StdDuration::from_secs(u64::from(now.second()))
        + StdDuration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    if into_minute.is_zero() {
        StdDuration::ZERO
    } else {
        StdDuration::from_secs(60).saturating_sub(into_minute)
    }
}

/// Random offset in `[0, max]`.
#[must_use]
pub fn jitter(max: StdDuration) -> StdDuration {
    if max.is_zero() {
        return StdDuration::ZERO;
    }
    let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    StdDuration::from_millis(rand::rng().random_range(0..=max_millis))
}

/// Delay before the first scheduler tick: the next minute boundary plus
/// jitter, so ticks never line up with the upstream's own minute rollover.
#[must_use]
pub fn first_tick_delay(now: DateTime<Utc>, max_jitter: StdDuration) -> StdDuration {
    until_next_minute(now) + jitter(max_jitter)
}
