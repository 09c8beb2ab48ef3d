//! Session calendar and strategy parameters
//!
//! All session boundaries are evaluated in exchange-local time (IST by
//! default) against the tick's own timestamp, never the wall clock.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Configuration for one trading session of the breakout strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Instrument the signals refer to (e.g. "NIFTY")
    pub symbol: String,
    /// Exchange timezone
    pub timezone: Tz,
    /// Market open, exchange-local (09:15 on NSE)
    pub market_open: NaiveTime,
    /// Market close, exchange-local (15:30 on NSE)
    pub market_close: NaiveTime,
    /// Width of the opening range that becomes the baseline
    pub baseline_minutes: i64,
    /// Option strike spacing in index points
    pub strike_step: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "NIFTY".to_string(),
            timezone: chrono_tz::Asia::Kolkata,
            market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            market_close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            baseline_minutes: 15,
            strike_step: 50.0,
        }
    }
}

impl SessionConfig {
    /// Exchange-local calendar date of an instant
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.timezone).date_naive()
    }

    /// Exchange-local wall-clock time of an instant
    pub fn local_time(&self, ts: DateTime<Utc>) -> NaiveTime {
        ts.with_timezone(&self.timezone).time()
    }

    /// Open window is [market_open, market_close)
    pub fn is_market_hours(&self, ts: DateTime<Utc>) -> bool {
        let t = self.local_time(ts);
        t >= self.market_open && t < self.market_close
    }

    /// Instant of a local wall-clock time on the given date.
    fn at_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        match self.timezone.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            // Only reachable inside a DST gap; IST has none.
            None => Utc.from_utc_datetime(&naive),
        }
    }

    /// Market open on `date`
    pub fn session_open(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at_local(date, self.market_open)
    }

    /// Market close on `date`
    pub fn session_close(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at_local(date, self.market_close)
    }

    /// End of the opening range (09:30 by default)
    pub fn baseline_end(&self, date: NaiveDate) -> DateTime<Utc> {
        self.session_open(date) + Duration::minutes(self.baseline_minutes)
    }

    /// True once the opening range of the tick's day has fully elapsed
    pub fn is_after_baseline_window(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.baseline_end(self.local_date(ts))
    }
}

/// Weekend suppression. Exchange holidays are left to the caller.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
