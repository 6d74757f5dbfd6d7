//! Poll Scheduling Decisions
//!
//! The pure half of the adaptive poll scheduler: given the wall clock, the
//! per-class fetch clocks and a [`PollPolicy`], decide which background fetch
//! (if any) runs on this tick. The side-effecting driver lives in
//! `application::services::scheduler`.
//!
//! # Rules (evaluated in order)
//!
//! 1. `market_open`: inside the trading window (closing buffer included) and
//!    past the post-open dead zone.
//! 2. `catch_up`: market closed on a weekday, last quote fetch older than the
//!    catch-up threshold and older than the most recent close.
//! 3. Neither: nothing runs.
//! 4. Quotes due: fetch quotes and stop. History never shares a tick with
//!    quotes.
//! 5. History due, quotes at least the safety offset old, not in the dead
//!    zone: fetch history.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use super::market::{HistoryInterval, MarketCalendar};

/// The two background resource classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Latest quotes for the whole watchlist.
    Quotes,
    /// Price history for the whole watchlist.
    History,
}

impl ResourceClass {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::History => "history",
        }
    }
}

/// Last unforced full-batch fetch per resource class.
///
/// Only successful background batches stamp these; forced single-symbol
/// fetches never touch them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerClock {
    quotes: Option<DateTime<Utc>>,
    history: Option<DateTime<Utc>>,
}

impl SchedulerClock {
    /// Last successful fetch of `class`, `None` if never fetched.
    #[must_use]
    pub const fn last_fetch(&self, class: ResourceClass) -> Option<DateTime<Utc>> {
        match class {
            ResourceClass::Quotes => self.quotes,
            ResourceClass::History => self.history,
        }
    }

    /// Record a successful full-batch fetch issued at `at`.
    pub const fn stamp(&mut self, class: ResourceClass, at: DateTime<Utc>) {
        match class {
            ResourceClass::Quotes => self.quotes = Some(at),
            ResourceClass::History => self.history = Some(at),
        }
    }

    /// Forget both clocks so the next eligible tick refreshes everything.
    pub const fn reset(&mut self) {
        self.quotes = None;
        self.history = None;
    }

    /// Time since the last fetch of `class`, `None` if never fetched.
    #[must_use]
    pub fn elapsed(&self, class: ResourceClass, now: DateTime<Utc>) -> Option<Duration> {
        self.last_fetch(class).map(|at| now - at)
    }

    fn is_at_least(&self, class: ResourceClass, now: DateTime<Utc>, min: Duration) -> bool {
        self.elapsed(class, now).is_none_or(|elapsed| elapsed >= min)
    }
}

/// Cadence and calendar constants for the scheduler.
///
/// The defaults are hand-tuned against an upstream allowing eight credits per
/// minute, one credit per symbol per batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Exchange calendar.
    pub calendar: MarketCalendar,
    /// Scheduler tick period.
    pub tick_interval: StdDuration,
    /// Upper bound of the random offset added to the minute-aligned first tick.
    pub max_tick_jitter: StdDuration,
    /// Minimum spacing of background quote batches.
    pub quote_interval: Duration,
    /// Minimum spacing of background history batches.
    pub history_interval: Duration,
    /// Minimum age of the last quote batch before history may run.
    pub min_safety_offset: Duration,
    /// Minimum age of the last quote batch before a closed-market catch-up.
    pub catch_up_threshold: Duration,
    /// Watchlist size above which history cannot share a quota window with
    /// the startup quote batch.
    pub history_batch_threshold: usize,
    /// Startup history delay when quota allows an immediate follow-up.
    pub startup_history_delay: StdDuration,
    /// Startup history delay that moves history into the next quota window.
    pub startup_history_spread_delay: StdDuration,
    /// Margin added when waiting out the dead zone.
    pub dead_zone_margin: StdDuration,
    /// Interval of background history batches.
    pub background_interval: HistoryInterval,
    /// Interval of forced drill-in history.
    pub forced_interval: HistoryInterval,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            calendar: MarketCalendar::default(),
            tick_interval: StdDuration::from_secs(60),
            max_tick_jitter: StdDuration::from_secs(5),
            quote_interval: Duration::minutes(5),
            history_interval: Duration::minutes(15),
            min_safety_offset: Duration::seconds(60),
            catch_up_threshold: Duration::minutes(30),
            history_batch_threshold: 4,
            startup_history_delay: StdDuration::from_secs(2),
            startup_history_spread_delay: StdDuration::from_secs(61),
            dead_zone_margin: StdDuration::from_secs(1),
            background_interval: HistoryInterval::FifteenMinutes,
            forced_interval: HistoryInterval::OneMinute,
        }
    }
}

/// Why a tick performed no fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Outside trading hours and no catch-up needed.
    MarketClosed,
    /// Inside the post-open dead zone.
    DeadZone,
    /// Neither class is due yet.
    NothingDue,
    /// History is due but the last quote batch is too recent.
    SafetyOffset,
}

impl SkipReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarketClosed => "market_closed",
            Self::DeadZone => "dead_zone",
            Self::NothingDue => "nothing_due",
            Self::SafetyOffset => "safety_offset",
        }
    }
}

/// Outcome of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Do nothing this tick.
    Skip(SkipReason),
    /// Fetch quotes for the whole watchlist.
    FetchQuotes {
        /// Fetching outside trading hours to pick up a missed close.
        catch_up: bool,
    },
    /// Fetch history for the whole watchlist.
    FetchHistory,
}

impl PollDecision {
    /// Resource class fetched by this decision, if any.
    #[must_use]
    pub const fn class(&self) -> Option<ResourceClass> {
        match self {
            Self::Skip(_) => None,
            Self::FetchQuotes { .. } => Some(ResourceClass::Quotes),
            Self::FetchHistory => Some(ResourceClass::History),
        }
    }
}

/// Decide which background fetch runs at `now`.
#[must_use]
pub fn decide(now: DateTime<Utc>, clock: &SchedulerClock, policy: &PollPolicy) -> PollDecision {
    let window = policy.calendar.window(now);
    let market_open = window.open && !window.in_dead_zone;
    let catch_up = !window.open && window.trading_day && needs_catch_up(now, clock, policy);

    if !market_open && !catch_up {
        return PollDecision::Skip(if window.in_dead_zone {
            SkipReason::DeadZone
        } else {
            SkipReason::MarketClosed
        });
    }

    if clock.is_at_least(ResourceClass::Quotes, now, policy.quote_interval) {
        return PollDecision::FetchQuotes { catch_up };
    }

    if !clock.is_at_least(ResourceClass::History, now, policy.history_interval) {
        return PollDecision::Skip(SkipReason::NothingDue);
    }

    if !clock.is_at_least(ResourceClass::Quotes, now, policy.min_safety_offset) {
        return PollDecision::Skip(SkipReason::SafetyOffset);
    }

    if window.in_dead_zone {
        return PollDecision::Skip(SkipReason::DeadZone);
    }

    PollDecision::FetchHistory
}

fn needs_catch_up(now: DateTime<Utc>, clock: &SchedulerClock, policy: &PollPolicy) -> bool {
    if !clock.is_at_least(ResourceClass::Quotes, now, policy.catch_up_threshold) {
        return false;
    }
    match (
        clock.last_fetch(ResourceClass::Quotes),
        policy.calendar.last_close(now),
    ) {
        (Some(last), Some(close)) => last < close,
        _ => true,
    }
}

/// Delay between the startup quote batch and the first history batch.
///
/// Inside the dead zone the delay lands just past its end. Otherwise a large
/// watchlist pushes history into the next quota window so the two batches
/// never share one.
#[must_use]
pub fn startup_history_delay(
    now: DateTime<Utc>,
    symbol_count: usize,
    policy: &PollPolicy,
) -> StdDuration {
    if let Some(end) = policy.calendar.dead_zone_end(now) {
        let remaining = (end - now).to_std().unwrap_or_default();
        return remaining + policy.dead_zone_margin;
    }

    if symbol_count > policy.history_batch_threshold {
        policy.startup_history_spread_delay
    } else {
        policy.startup_history_delay
    }
}
