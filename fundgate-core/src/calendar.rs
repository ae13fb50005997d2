//! Mainland market trading calendar.
//!
//! Trading days are weekdays not listed as holidays. Dates are evaluated in
//! China Standard Time (UTC+8) whatever the host timezone is.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Timelike, Utc, Weekday};
use std::collections::BTreeSet;

const CST_OFFSET_SECS: i32 = 8 * 3600;

/// Hour (market time) after which the day's NAV is expected to be published.
pub const DEFAULT_SETTLEMENT_HOUR: u32 = 20;

/// UTC+8.
pub fn market_offset() -> FixedOffset {
    FixedOffset::east_opt(CST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// `now` expressed in market time.
pub fn market_time(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&market_offset())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
    settlement_hour: u32,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new(std::iter::empty(), DEFAULT_SETTLEMENT_HOUR)
    }
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>, settlement_hour: u32) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
            settlement_hour: settlement_hour.min(23),
        }
    }

    pub fn settlement_hour(&self) -> u32 {
        self.settlement_hour
    }

    pub fn holidays(&self) -> impl Iterator<Item = &NaiveDate> {
        self.holidays.iter()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// The closest trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut cur = date - Duration::days(1);
        // Bounded: a year of consecutive holidays would be a config error.
        for _ in 0..366 {
            if self.is_trading_day(cur) {
                return cur;
            }
            cur -= Duration::days(1);
        }
        cur
    }

    /// The most recent `n` trading days up to and including `date`, oldest first.
    pub fn last_trading_days(&self, date: NaiveDate, n: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(n);
        let mut cur = if self.is_trading_day(date) {
            date
        } else {
            self.previous_trading_day(date)
        };
        while out.len() < n {
            out.push(cur);
            cur = self.previous_trading_day(cur);
        }
        out.reverse();
        out
    }

    /// Newest NAV date that should be published at `now`.
    ///
    /// On a non-trading day that is the last trading day before it. On a
    /// trading day it is today once the settlement hour has passed, otherwise
    /// the previous trading day.
    pub fn latest_expected_settlement(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = market_time(now);
        let today = local.date_naive();
        if !self.is_trading_day(today) {
            return self.previous_trading_day(today);
        }
        if local.hour() >= self.settlement_hour {
            today
        } else {
            self.previous_trading_day(today)
        }
    }

    /// A NAV dated `nav_date` is final if it is at least the expected settlement date.
    pub fn is_settled(&self, nav_date: NaiveDate, now: DateTime<Utc>) -> bool {
        nav_date >= self.latest_expected_settlement(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Build a UTC instant from a market-time wall clock.
    fn cst(y: i32, m: u32, day: u32, h: u32, min: u32) -> DateTime<Utc> {
        market_offset()
            .with_ymd_and_hms(y, m, day, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn trading_day_before_settlement_hour_expects_previous_day() {
        // Tue 2025-11-18 15:00 market time
        let cal = TradingCalendar::default();
        assert_eq!(cal.latest_expected_settlement(cst(2025, 11, 18, 15, 0)), d(2025, 11, 17));
        assert!(!cal.is_settled(d(2025, 11, 16), cst(2025, 11, 18, 15, 0)));
        assert!(cal.is_settled(d(2025, 11, 17), cst(2025, 11, 18, 15, 0)));
    }

    #[test]
    fn trading_day_after_settlement_hour_expects_today() {
        let cal = TradingCalendar::default();
        let now = cst(2025, 11, 18, 20, 0);
        assert_eq!(cal.latest_expected_settlement(now), d(2025, 11, 18));
        assert!(!cal.is_settled(d(2025, 11, 17), now));
    }

    #[test]
    fn weekend_expects_friday() {
        let cal = TradingCalendar::default();
        assert_eq!(cal.latest_expected_settlement(cst(2025, 11, 22, 10, 0)), d(2025, 11, 21));
        assert_eq!(cal.latest_expected_settlement(cst(2025, 11, 23, 22, 0)), d(2025, 11, 21));
    }

    #[test]
    fn monday_morning_expects_friday() {
        let cal = TradingCalendar::default();
        assert_eq!(cal.latest_expected_settlement(cst(2025, 11, 24, 9, 30)), d(2025, 11, 21));
    }

    #[test]
    fn evaluation_uses_market_time_not_utc() {
        // 2025-11-18 13:00 UTC is 21:00 in Beijing.
        let cal = TradingCalendar::default();
        let now = Utc.with_ymd_and_hms(2025, 11, 18, 13, 0, 0).unwrap();
        assert_eq!(cal.latest_expected_settlement(now), d(2025, 11, 18));
    }

    #[test]
    fn holidays_are_skipped() {
        let holidays = (1..=7).map(|day| d(2025, 10, day));
        let cal = TradingCalendar::new(holidays, 20);
        assert!(!cal.is_trading_day(d(2025, 10, 6)));
        assert_eq!(cal.latest_expected_settlement(cst(2025, 10, 3, 21, 0)), d(2025, 9, 30));
        assert_eq!(cal.latest_expected_settlement(cst(2025, 10, 8, 10, 0)), d(2025, 9, 30));
    }

    #[test]
    fn last_trading_days_oldest_first() {
        let cal = TradingCalendar::default();
        assert_eq!(
            cal.last_trading_days(d(2025, 11, 23), 3),
            [d(2025, 11, 19), d(2025, 11, 20), d(2025, 11, 21)]
        );
        assert!(cal.last_trading_days(d(2025, 11, 23), 0).is_empty());
    }
}
