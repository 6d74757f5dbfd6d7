//! Upstream Quota Accounting
//!
//! The quote upstream charges one credit per symbol per batch call, limited
//! per rolling minute and per exchange-local day. The scheduler's gating
//! keeps well inside these limits; this module is the last check before a
//! request leaves the process.
//!
//! A batch larger than the per-minute limit is admitted only by an idle
//! window; the next request then waits for the whole batch to age out.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::market::MarketCalendar;

/// Default credits per rolling minute.
pub const CREDITS_PER_MINUTE: u32 = 8;

/// Default credits per exchange-local day.
pub const CREDITS_PER_DAY: u32 = 800;

/// Default credits held back per hour of remaining session for background
/// refreshes when a forced fetch asks for budget.
pub const RESERVE_PER_SESSION_HOUR: u32 = 16;

/// Who is asking for credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPriority {
    /// Scheduler-driven full-batch refresh.
    Background,
    /// User-triggered drill-in fetch.
    Forced,
}

/// Reasons a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaDenied {
    /// Not enough credits left in the rolling minute.
    #[error("rate window exhausted: requested {requested}, available {available}")]
    RateWindow {
        /// Credits requested.
        requested: u32,
        /// Credits still available in the window.
        available: u32,
    },
    /// Not enough credits left today.
    #[error("daily budget exhausted: requested {requested}, remaining {remaining}, reserved {reserved}")]
    DailyBudget {
        /// Credits requested.
        requested: u32,
        /// Credits left today.
        remaining: u32,
        /// Credits held back for background refreshes.
        reserved: u32,
    },
}

/// Sliding-window credit limiter.
#[derive(Debug, Clone)]
pub struct RateWindow {
    max_credits: u32,
    window: Duration,
    spent: VecDeque<(DateTime<Utc>, u32)>,
}

impl RateWindow {
    /// Create a limiter allowing `max_credits` per `window`.
    #[must_use]
    pub const fn new(max_credits: u32, window: Duration) -> Self {
        Self {
            max_credits,
            window,
            spent: VecDeque::new(),
        }
    }

    /// Credits available at `now`.
    pub fn available(&mut self, now: DateTime<Utc>) -> u32 {
        self.max_credits.saturating_sub(self.used(now))
    }

    /// Check whether `credits` may be spent at `now`.
    ///
    /// An idle window admits any request, including one above the limit.
    pub fn admits(&mut self, credits: u32, now: DateTime<Utc>) -> bool {
        let used = self.used(now);
        used == 0 || credits <= self.max_credits.saturating_sub(used)
    }

    fn used(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.spent
            .iter()
            .fold(0_u32, |total, (_, credits)| total.saturating_add(*credits))
    }

    fn record(&mut self, credits: u32, now: DateTime<Utc>) {
        self.spent.push_back((now, credits));
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some((at, _)) = self.spent.front() {
            if *at <= now - self.window {
                self.spent.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(CREDITS_PER_MINUTE, Duration::minutes(1))
    }
}

/// Per-day credit budget with a reserve for background refreshes.
#[derive(Debug, Clone)]
pub struct DailyBudget {
    daily_credits: u32,
    reserve_per_hour: u32,
    remaining: u32,
    day: Option<NaiveDate>,
}

impl DailyBudget {
    /// Create a budget of `daily_credits` per day.
    #[must_use]
    pub const fn new(daily_credits: u32, reserve_per_hour: u32) -> Self {
        Self {
            daily_credits,
            reserve_per_hour,
            remaining: daily_credits,
            day: None,
        }
    }

    /// Credits left today.
    pub fn remaining(&mut self, now: DateTime<Utc>, calendar: &MarketCalendar) -> u32 {
        self.roll_over(now, calendar);
        self.remaining
    }

    /// Credits held back from forced fetches at `now`.
    #[must_use]
    pub fn reserved(&self, now: DateTime<Utc>, calendar: &MarketCalendar) -> u32 {
        let minutes = calendar.session_minutes_remaining(now);
        (minutes * self.reserve_per_hour).div_ceil(60)
    }

    fn roll_over(&mut self, now: DateTime<Utc>, calendar: &MarketCalendar) {
        let today = now.with_timezone(&calendar.tz).date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.remaining = self.daily_credits;
        }
    }
}

impl Default for DailyBudget {
    fn default() -> Self {
        Self::new(CREDITS_PER_DAY, RESERVE_PER_SESSION_HOUR)
    }
}

/// Combined per-minute and per-day quota check.
#[derive(Debug, Clone, Default)]
pub struct QuotaGuard {
    calendar: MarketCalendar,
    window: RateWindow,
    budget: DailyBudget,
}

impl QuotaGuard {
    /// Create a guard from its parts.
    #[must_use]
    pub const fn new(calendar: MarketCalendar, window: RateWindow, budget: DailyBudget) -> Self {
        Self {
            calendar,
            window,
            budget,
        }
    }

    /// Spend `credits` if both limits allow it; spends nothing otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaDenied`] naming the limit that refused the request.
    pub fn try_acquire(
        &mut self,
        credits: u32,
        now: DateTime<Utc>,
        priority: FetchPriority,
    ) -> Result<(), QuotaDenied> {
        if !self.window.admits(credits, now) {
            return Err(QuotaDenied::RateWindow {
                requested: credits,
                available: self.window.available(now),
            });
        }

        let remaining = self.budget.remaining(now, &self.calendar);
        let reserved = match priority {
            FetchPriority::Background => 0,
            FetchPriority::Forced => self.budget.reserved(now, &self.calendar),
        };
        if credits > remaining.saturating_sub(reserved) {
            return Err(QuotaDenied::DailyBudget {
                requested: credits,
                remaining,
                reserved,
            });
        }

        self.window.record(credits, now);
        self.budget.remaining -= credits;
        Ok(())
    }

    /// Credits available in the rolling window at `now`.
    pub fn window_available(&mut self, now: DateTime<Utc>) -> u32 {
        self.window.available(now)
    }

    /// Credits left today at `now`.
    pub fn daily_remaining(&mut self, now: DateTime<Utc>) -> u32 {
        self.budget.remaining(now, &self.calendar)
    }
}
