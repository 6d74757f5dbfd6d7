//! Display Throttle
//!
//! Decouples the value shown to the user from the value last received. The
//! first value after an idle period is shown at once; after that the shown
//! value changes at most once per throttle interval and always carries the
//! newest value available when the promote timer fires.

use tokio::time::{Duration, Instant};

/// Default throttle interval for sensor readings.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// Latest and displayed values plus the pending promote deadline.
#[derive(Debug, Clone)]
pub struct DisplayBuffer<T> {
    throttle: Duration,
    latest: Option<T>,
    display: Option<T>,
    promote_at: Option<Instant>,
    dirty: bool,
}

impl<T: Clone> DisplayBuffer<T> {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            latest: None,
            display: None,
            promote_at: None,
            dirty: false,
        }
    }

    /// Accept a freshly received value.
    ///
    /// Returns `true` when `display` changed as a result.
    pub fn accept(&mut self, value: T, now: Instant) -> bool {
        self.latest = Some(value);
        if self.promote_at.is_some() {
            self.dirty = true;
            return false;
        }
        self.display.clone_from(&self.latest);
        self.promote_at = Some(now + self.throttle);
        self.dirty = false;
        true
    }

    /// Run the promote step if its deadline has passed.
    ///
    /// Returns `true` when `display` changed. A promote that copies a new
    /// value re-arms the timer; one with nothing new ends the throttle period.
    pub fn promote(&mut self, now: Instant) -> bool {
        match self.promote_at {
            Some(at) if at <= now => {}
            _ => return false,
        }
        if self.dirty {
            self.display.clone_from(&self.latest);
            self.promote_at = Some(now + self.throttle);
            self.dirty = false;
            true
        } else {
            self.promote_at = None;
            false
        }
    }

    /// Pending promote deadline, if any.
    #[must_use]
    pub const fn promote_deadline(&self) -> Option<Instant> {
        self.promote_at
    }

    /// Value currently shown.
    #[must_use]
    pub const fn display(&self) -> Option<&T> {
        self.display.as_ref()
    }

    /// Most recently received value.
    #[must_use]
    pub const fn latest(&self) -> Option<&T> {
        self.latest.as_ref()
    }

    /// Throttle interval.
    #[must_use]
    pub const fn throttle(&self) -> Duration {
        self.throttle
    }
}

impl<T: Clone> Default for DisplayBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const THROTTLE: Duration = Duration::from_millis(1000);

    #[test]
    fn first_value_is_shown_immediately() {
        let start = Instant::now();
        let mut buffer = DisplayBuffer::new(THROTTLE);

        assert!(buffer.accept(1, start));
        assert_eq!(buffer.display(), Some(&1));
        assert_eq!(buffer.promote_deadline(), Some(start + THROTTLE));
    }

    #[test]
    fn burst_promotes_newest_value_at_deadline() {
        let start = Instant::now();
        let mut buffer = DisplayBuffer::new(THROTTLE);

        buffer.accept(1, start);
        assert!(!buffer.accept(2, start + Duration::from_millis(100)));
        assert!(!buffer.accept(3, start + Duration::from_millis(200)));
        assert_eq!(buffer.display(), Some(&1));
        assert_eq!(buffer.latest(), Some(&3));

        assert!(!buffer.promote(start + Duration::from_millis(999)));
        assert!(buffer.promote(start + THROTTLE));
        assert_eq!(buffer.display(), Some(&3));
    }

    #[test]
    fn quiet_promote_ends_throttle_period() {
        let start = Instant::now();
        let mut buffer = DisplayBuffer::new(THROTTLE);

        buffer.accept(1, start);
        assert!(!buffer.promote(start + THROTTLE));
        assert_eq!(buffer.promote_deadline(), None);

        assert!(buffer.accept(2, start + Duration::from_secs(5)));
        assert_eq!(buffer.display(), Some(&2));
    }

    /// Replay arrivals (millisecond gaps) against the buffer, firing the
    /// promote timer whenever it falls due before the next arrival, and
    /// return the instants at which `display` changed.
    fn simulate(gaps: &[u64]) -> (Vec<Instant>, Vec<(Instant, bool)>) {
        let start = Instant::now();
        let mut buffer = DisplayBuffer::new(THROTTLE);
        let mut changes = Vec::new();
        let mut arrivals = Vec::new();
        let mut now = start;

        for (value, gap) in gaps.iter().enumerate() {
            let arrival = now + Duration::from_millis(*gap);
            while let Some(at) = buffer.promote_deadline() {
                if at > arrival {
                    break;
                }
                if buffer.promote(at) {
                    changes.push(at);
                }
            }
            let idle = buffer.promote_deadline().is_none();
            if buffer.accept(value, arrival) {
                changes.push(arrival);
            }
            arrivals.push((arrival, idle));
            now = arrival;
        }
        while let Some(at) = buffer.promote_deadline() {
            if buffer.promote(at) {
                changes.push(at);
            }
        }
        (changes, arrivals)
    }

    proptest! {
        #[test]
        fn display_changes_at_most_once_per_interval(gaps in prop::collection::vec(0u64..2_500, 1..60)) {
            let (changes, _) = simulate(&gaps);
            for pair in changes.windows(2) {
                prop_assert!(pair[1] - pair[0] >= THROTTLE);
            }
        }

        #[test]
        fn first_message_after_idle_shows_immediately(gaps in prop::collection::vec(0u64..2_500, 1..60)) {
            let (changes, arrivals) = simulate(&gaps);
            for (arrival, idle) in arrivals {
                if idle {
                    prop_assert!(changes.contains(&arrival));
                }
            }
        }

        #[test]
        fn display_settles_on_newest_value(gaps in prop::collection::vec(0u64..2_500, 1..60)) {
            let start = Instant::now();
            let mut buffer = DisplayBuffer::new(THROTTLE);
            let mut now = start;
            for (value, gap) in gaps.iter().enumerate() {
                now += Duration::from_millis(*gap);
                while let Some(at) = buffer.promote_deadline().filter(|at| *at <= now) {
                    buffer.promote(at);
                }
                buffer.accept(value, now);
            }
            while let Some(at) = buffer.promote_deadline() {
                buffer.promote(at);
            }
            prop_assert_eq!(buffer.display(), Some(&(gaps.len() - 1)));
        }
    }
}
