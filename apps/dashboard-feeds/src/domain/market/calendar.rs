//! Exchange Trading Calendar
//!
//! Pure evaluation of the exchange's trading window from wall-clock time.
//! Nothing here is cached: a [`MarketWindow`] is derived on every call because
//! wall-clock time moves continuously.
//!
//! # Calendar Policy (America/New_York)
//!
//! ```text
//! 09:30        09:35                              16:00       16:30
//!   |--dead zone--|-------- regular session --------|--buffer--|
//!   ^ open                                           ^ close    ^ polling stops
//! ```
//!
//! Weekends are excluded. Exchange holidays are not modelled.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Exchange time zone.
pub const MARKET_TZ: Tz = chrono_tz::America::New_York;

/// Regular session open, minutes after local midnight (09:30).
pub const MARKET_OPEN_MINUTE: u32 = 9 * 60 + 30;

/// Regular session close, minutes after local midnight (16:00).
pub const MARKET_CLOSE_MINUTE: u32 = 16 * 60;

/// Minutes after the close during which the market still counts as open.
pub const CLOSING_BUFFER_MINUTES: u32 = 30;

/// Minutes after the open during which the upstream has not published data.
pub const DEAD_ZONE_MINUTES: u32 = 5;

/// Fixed calendar policy for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCalendar {
    /// Exchange time zone.
    pub tz: Tz,
    /// Session open, minutes after local midnight.
    pub open_minute: u32,
    /// Session close, minutes after local midnight.
    pub close_minute: u32,
    /// Closing buffer in minutes.
    pub closing_buffer_minutes: u32,
    /// Post-open dead zone in minutes.
    pub dead_zone_minutes: u32,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self {
            tz: MARKET_TZ,
            open_minute: MARKET_OPEN_MINUTE,
            close_minute: MARKET_CLOSE_MINUTE,
            closing_buffer_minutes: CLOSING_BUFFER_MINUTES,
            dead_zone_minutes: DEAD_ZONE_MINUTES,
        }
    }
}

/// Trading window evaluated at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketWindow {
    /// Monday through Friday in exchange-local time.
    pub trading_day: bool,
    /// Inside the regular session or its closing buffer on a trading day.
    pub open: bool,
    /// Inside the post-open dead zone on a trading day.
    pub in_dead_zone: bool,
    /// Exchange-local minute of the day.
    pub minute_of_day: u32,
}

impl MarketCalendar {
    /// Evaluate the trading window at `now`.
    #[must_use]
    pub fn window(&self, now: DateTime<Utc>) -> MarketWindow {
        let local = now.with_timezone(&self.tz);
        let trading_day = is_weekday(local.date_naive());
        let minute_of_day = local.hour() * 60 + local.minute();

        let open = trading_day
            && minute_of_day >= self.open_minute
            && minute_of_day < self.close_minute + self.closing_buffer_minutes;
        let in_dead_zone = trading_day
            && minute_of_day >= self.open_minute
            && minute_of_day < self.open_minute + self.dead_zone_minutes;

        MarketWindow {
            trading_day,
            open,
            in_dead_zone,
            minute_of_day,
        }
    }

    /// End of today's post-open dead zone, if `now` falls inside it.
    #[must_use]
    pub fn dead_zone_end(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.window(now).in_dead_zone {
            return None;
        }
        let date = now.with_timezone(&self.tz).date_naive();
        self.local_instant(date, self.open_minute + self.dead_zone_minutes)
    }

    /// The most recent regular-session close at or before `now`.
    ///
    /// Returns `None` only if no close can be resolved within the past week,
    /// which cannot happen for a weekday calendar.
    #[must_use]
    pub fn last_close(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.tz).date_naive();
        (0..8)
            .filter_map(|days_back| today.checked_sub_signed(Duration::days(days_back)))
            .filter(|date| is_weekday(*date))
            .filter_map(|date| self.local_instant(date, self.close_minute))
            .find(|close| *close <= now)
    }

    /// Total regular-session minutes remaining after `now` today.
    #[must_use]
    pub fn session_minutes_remaining(&self, now: DateTime<Utc>) -> u32 {
        let window = self.window(now);
        if !window.trading_day || window.minute_of_day >= self.close_minute {
            return 0;
        }
        let start = window.minute_of_day.max(self.open_minute);
        self.close_minute - start
    }

    /// Length of the regular session in minutes.
    #[must_use]
    pub const fn session_minutes(&self) -> u32 {
        self.close_minute.saturating_sub(self.open_minute)
    }

    fn local_instant(&self, date: NaiveDate, minute_of_day: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(minute_of_day / 60, minute_of_day % 60, 0)?;
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }
}

fn is_weekday(date: NaiveDate) -> bool {
    date.weekday().number_from_monday() <= 5
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// 2026-10-13 is a Tuesday; New York is on EDT (UTC-4).
    fn et(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        MARKET_TZ
            .with_ymd_and_hms(2026, 10, day, hour, minute, second)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test_case(13, 9, 29, false ; "tuesday before open")]
    #[test_case(13, 9, 30, true ; "tuesday at open")]
    #[test_case(13, 15, 59, true ; "tuesday before close")]
    #[test_case(13, 16, 10, true ; "tuesday inside closing buffer")]
    #[test_case(13, 16, 30, false ; "tuesday after buffer")]
    #[test_case(17, 12, 0, false ; "saturday midday")]
    #[test_case(18, 12, 0, false ; "sunday midday")]
    fn open_window(day: u32, hour: u32, minute: u32, expected: bool) {
        let calendar = MarketCalendar::default();
        assert_eq!(calendar.window(et(day, hour, minute, 0)).open, expected);
    }

    #[test_case(9, 29, 59, false ; "before open")]
    #[test_case(9, 30, 0, true ; "at open")]
    #[test_case(9, 32, 0, true ; "inside")]
    #[test_case(9, 34, 59, true ; "last second")]
    #[test_case(9, 35, 0, false ; "at end")]
    fn dead_zone(hour: u32, minute: u32, second: u32, expected: bool) {
        let calendar = MarketCalendar::default();
        assert_eq!(
            calendar.window(et(13, hour, minute, second)).in_dead_zone,
            expected
        );
    }

    #[test]
    fn dead_zone_end_is_open_plus_window() {
        let calendar = MarketCalendar::default();
        assert_eq!(
            calendar.dead_zone_end(et(13, 9, 32, 10)),
            Some(et(13, 9, 35, 0))
        );
        assert_eq!(calendar.dead_zone_end(et(13, 10, 0, 0)), None);
    }

    #[test]
    fn weekend_has_no_dead_zone() {
        let calendar = MarketCalendar::default();
        assert!(!calendar.window(et(17, 9, 31, 0)).in_dead_zone);
        assert!(!calendar.window(et(17, 9, 31, 0)).trading_day);
    }

    #[test]
    fn last_close_same_day_after_close() {
        let calendar = MarketCalendar::default();
        assert_eq!(calendar.last_close(et(13, 17, 0, 0)), Some(et(13, 16, 0, 0)));
    }

    #[test]
    fn last_close_before_open_is_previous_trading_day() {
        let calendar = MarketCalendar::default();
        // Tuesday morning -> Monday close
        assert_eq!(calendar.last_close(et(13, 8, 0, 0)), Some(et(12, 16, 0, 0)));
        // Monday morning -> Friday close
        assert_eq!(calendar.last_close(et(19, 8, 0, 0)), Some(et(16, 16, 0, 0)));
        // Sunday -> Friday close
        assert_eq!(calendar.last_close(et(18, 12, 0, 0)), Some(et(16, 16, 0, 0)));
    }

    #[test]
    fn session_minutes_remaining() {
        let calendar = MarketCalendar::default();
        assert_eq!(calendar.session_minutes_remaining(et(13, 8, 0, 0)), 390);
        assert_eq!(calendar.session_minutes_remaining(et(13, 15, 0, 0)), 60);
        assert_eq!(calendar.session_minutes_remaining(et(13, 16, 5, 0)), 0);
        assert_eq!(calendar.session_minutes_remaining(et(17, 10, 0, 0)), 0);
    }
}
