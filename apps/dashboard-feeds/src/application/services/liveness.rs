//! Liveness Detection
//!
//! Two independent detectors decide when an open stream session has gone
//! silent:
//!
//! - [`Watchdog`]: a single deadline, pushed forward by every inbound frame
//!   (keepalives included).
//! - [`HealthCheck`]: compares wall-clock time against the arrival of the
//!   last *data* frame on every health tick. The monotonic clock may stop
//!   while the host is suspended; the wall clock keeps running, so a session
//!   that slept through its budget is closed on the first tick after resume.
//!
//! The heartbeat sends an application keepalive on a shorter period so that
//! intermediaries never see the connection idle.

use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use crate::infrastructure::config::StreamSettings;

/// Timing for the liveness detectors and the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Maximum silence tolerated on an open session.
    pub silence_budget: Duration,
    /// Interval between keepalive sends.
    pub heartbeat_interval: Duration,
    /// Interval between health-check evaluations.
    pub health_check_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            silence_budget: Duration::from_secs(45),
            heartbeat_interval: Duration::from_secs(20),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl LivenessConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            silence_budget: settings.silence_budget,
            heartbeat_interval: settings.heartbeat_interval,
            health_check_interval: settings.health_check_interval,
        }
    }
}

/// Silence deadline for one session.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    budget: Duration,
    deadline: Instant,
}

impl Watchdog {
    /// Arm a watchdog at `now`.
    #[must_use]
    pub fn armed(budget: Duration, now: Instant) -> Self {
        Self {
            budget,
            deadline: now + budget,
        }
    }

    /// Push the deadline a full budget past `now`.
    pub fn reset(&mut self, now: Instant) {
        self.deadline = now + self.budget;
    }

    /// Current deadline.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Check if the deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Wall-delta detector for data silence.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheck {
    budget: Duration,
    last_data_at: DateTime<Utc>,
}

impl HealthCheck {
    /// Start tracking at `now`; the session open counts as data.
    #[must_use]
    pub const fn started(budget: Duration, now: DateTime<Utc>) -> Self {
        Self {
            budget,
            last_data_at: now,
        }
    }

    /// Record a data frame.
    pub const fn record_data(&mut self, now: DateTime<Utc>) {
        self.last_data_at = now;
    }

    /// Time since the last data frame. A wall clock stepped backwards reads
    /// as no silence.
    #[must_use]
    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_data_at).to_std().unwrap_or_default()
    }

    /// Check if data silence has reached the budget.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.silence(now) >= self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_reset_pushes_deadline() {
        let start = Instant::now();
        let mut watchdog = Watchdog::armed(Duration::from_secs(45), start);

        assert!(!watchdog.is_expired(start + Duration::from_secs(44)));
        watchdog.reset(start + Duration::from_secs(30));
        assert!(!watchdog.is_expired(start + Duration::from_secs(60)));
        assert!(watchdog.is_expired(start + Duration::from_secs(75)));
    }

    fn wall(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap_or_default()
    }

    #[test]
    fn health_check_ignores_everything_but_data() {
        let mut health = HealthCheck::started(Duration::from_secs(45), wall(0));

        assert!(!health.is_stale(wall(44)));
        assert!(health.is_stale(wall(45)));

        health.record_data(wall(40));
        assert!(!health.is_stale(wall(60)));
        assert_eq!(health.silence(wall(60)), Duration::from_secs(20));
    }

    #[test]
    fn health_check_trips_on_wall_clock_jump() {
        let health = HealthCheck::started(Duration::from_secs(45), wall(0));

        // Ten minutes of suspend pass on the wall clock in one step.
        assert!(health.is_stale(wall(600)));
        assert_eq!(health.silence(wall(600)), Duration::from_secs(600));
    }

    #[test]
    fn health_check_tolerates_wall_clock_stepping_back() {
        let health = HealthCheck::started(Duration::from_secs(45), wall(100));

        assert!(!health.is_stale(wall(0)));
        assert_eq!(health.silence(wall(0)), Duration::ZERO);
    }

    #[test]
    fn default_heartbeat_is_shorter_than_budget() {
        let config = LivenessConfig::default();
        assert!(config.heartbeat_interval < config.silence_budget);
        assert!(config.health_check_interval < config.silence_budget);
    }
}
