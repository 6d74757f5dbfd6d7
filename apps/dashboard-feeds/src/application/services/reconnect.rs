//! Reconnection Timer
//!
//! Fixed-delay reconnect scheduling. The stream peer is a device on the local
//! network that is expected back shortly, so every attempt waits the same
//! delay. At most one reconnect is ever pending: scheduling while one is
//! already pending is a no-op.

use tokio::time::{Duration, Instant};

use crate::infrastructure::config::StreamSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay between losing a session and the next connect attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            delay: settings.reconnect_delay,
        }
    }
}

/// Single pending reconnect deadline.
///
/// # Example
///
/// ```rust
/// use dashboard_feeds::application::services::reconnect::{ReconnectConfig, ReconnectTimer};
/// use tokio::time::Instant;
///
/// let mut timer = ReconnectTimer::new(ReconnectConfig::default());
/// let now = Instant::now();
///
/// assert!(timer.schedule(now));
/// // A second close before the first attempt does not stack another timer.
/// assert!(!timer.schedule(now));
/// assert!(timer.take_due(now + ReconnectConfig::default().delay));
/// ```
#[derive(Debug)]
pub struct ReconnectTimer {
    config: ReconnectConfig,
    pending: Option<Instant>,
    attempt_count: u32,
}

impl ReconnectTimer {
    /// Create an idle timer.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            pending: None,
            attempt_count: 0,
        }
    }

    /// Schedule a reconnect `delay` after `now`.
    ///
    /// Returns `false` if one was already pending.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(now + self.config.delay);
        true
    }

    /// Consume the pending reconnect if it is due at `now`.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(at) if at <= now => {
                self.pending = None;
                self.attempt_count = self.attempt_count.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    /// Drop any pending reconnect.
    pub const fn cancel(&mut self) {
        self.pending = None;
    }

    /// Forget the attempt streak after a successful open.
    pub const fn reset(&mut self) {
        self.pending = None;
        self.attempt_count = 0;
    }

    /// Pending deadline, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<Instant> {
        self.pending
    }

    /// Attempts since the last successful open.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_does_not_stack() {
        let start = Instant::now();
        let mut timer = ReconnectTimer::new(ReconnectConfig::default());

        assert!(timer.schedule(start));
        assert!(!timer.schedule(start + Duration::from_secs(2)));
        assert_eq!(timer.pending(), Some(start + Duration::from_secs(5)));
    }

    #[test]
    fn take_due_only_after_delay() {
        let start = Instant::now();
        let mut timer = ReconnectTimer::new(ReconnectConfig::default());
        timer.schedule(start);

        assert!(!timer.take_due(start + Duration::from_millis(4_999)));
        assert!(timer.take_due(start + Duration::from_secs(5)));
        assert_eq!(timer.pending(), None);
        assert_eq!(timer.attempt_count(), 1);
        assert!(timer.schedule(start + Duration::from_secs(6)));
    }

    #[test]
    fn delay_is_fixed_across_attempts() {
        let mut now = Instant::now();
        let mut timer = ReconnectTimer::new(ReconnectConfig::default());

        for _ in 0..5 {
            timer.schedule(now);
            assert_eq!(timer.pending(), Some(now + Duration::from_secs(5)));
            now += Duration::from_secs(5);
            assert!(timer.take_due(now));
        }
        assert_eq!(timer.attempt_count(), 5);

        timer.reset();
        assert_eq!(timer.attempt_count(), 0);
    }

    #[test]
    fn cancel_clears_pending() {
        let start = Instant::now();
        let mut timer = ReconnectTimer::new(ReconnectConfig::default());
        timer.schedule(start);
        timer.cancel();
        assert_eq!(timer.pending(), None);
        assert!(!timer.take_due(start + Duration::from_secs(10)));
    }
}
