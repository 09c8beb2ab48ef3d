//! Candle aggregation from ticks
//!
//! Ticks are bucketed into OHLC candles at 15m, 5m and 1m. A candle is
//! sealed by the first tick that belongs to a later bucket and is handed
//! out by value, so a closed candle can never be touched again.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::ticks::Tick;
use crate::error::CoreError;

/// Candle width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "15m")]
    FifteenMinute,
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "1m")]
    OneMinute,
}

impl Resolution {
    /// Coarsest first; closed-candle events are reported in this order
    pub const ALL: [Resolution; 3] = [
        Resolution::FifteenMinute,
        Resolution::FiveMinute,
        Resolution::OneMinute,
    ];

    pub fn seconds(&self) -> i64 {
        match self {
            Resolution::FifteenMinute => 15 * 60,
            Resolution::FiveMinute => 5 * 60,
            Resolution::OneMinute => 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Floor `ts` to this resolution in exchange-local wall-clock time,
    /// so buckets line up with the local session open.
    pub fn bucket_start(&self, ts: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
        let local = ts.with_timezone(&timezone);
        let into_bucket = local.num_seconds_from_midnight() as i64 % self.seconds();
        ts - Duration::seconds(into_bucket) - Duration::nanoseconds(local.nanosecond() as i64)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::FifteenMinute => write!(f, "15m"),
            Resolution::FiveMinute => write!(f, "5m"),
            Resolution::OneMinute => write!(f, "1m"),
        }
    }
}

/// OHLC candle for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub resolution: Resolution,
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub is_closed: bool,
    pub tick_count: u64,
}

impl Candle {
    fn opened(resolution: Resolution, bucket_start: DateTime<Utc>, price: f64) -> Self {
        Self {
            resolution,
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            is_closed: false,
            tick_count: 1,
        }
    }

    fn add_tick(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.tick_count += 1;
    }

    fn seal(mut self) -> Self {
        self.is_closed = true;
        self
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + self.resolution.duration()
    }

    /// Bullish body
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    /// Bearish body
    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// Whether `[low, high]` includes `level`
    pub fn touches(&self, level: f64) -> bool {
        self.low <= level && level <= self.high
    }
}

/// Candle produced by the history collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalCandle {
    pub resolution: Resolution,
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl HistoricalCandle {
    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + self.resolution.duration()
    }
}

/// Aggregates ticks into candles of one resolution
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    resolution: Resolution,
    timezone: Tz,
    current: Option<Candle>,
    /// End of the most recently sealed bucket
    sealed_until: Option<DateTime<Utc>>,
}

impl CandleAggregator {
    pub fn new(resolution: Resolution, timezone: Tz) -> Self {
        Self {
            resolution,
            timezone,
            current: None,
            sealed_until: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Currently open candle, if any
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Earliest timestamp still accepted: the open bucket's start, or the
    /// end of the last sealed bucket when nothing is open
    pub fn accepts_from(&self) -> Option<DateTime<Utc>> {
        match (&self.current, self.sealed_until) {
            (Some(candle), Some(sealed)) => Some(candle.bucket_start.max(sealed)),
            (Some(candle), None) => Some(candle.bucket_start),
            (None, sealed) => sealed,
        }
    }

    /// Reject ticks older than the open bucket, or belonging to a bucket
    /// that was already sealed, without mutating anything
    pub fn check_order(&self, tick: &Tick) -> Result<(), CoreError> {
        if let Some(from) = self.accepts_from() {
            if tick.timestamp < from {
                return Err(CoreError::OutOfOrderTick {
                    tick: tick.timestamp,
                    bucket_start: from,
                });
            }
        }
        Ok(())
    }

    /// Process a tick and return the sealed candle if a new bucket started
    pub fn ingest(&mut self, tick: &Tick) -> Result<Option<Candle>, CoreError> {
        self.check_order(tick)?;
        let bucket = self.resolution.bucket_start(tick.timestamp, self.timezone);

        match self.current.take() {
            Some(mut candle) if candle.bucket_start == bucket => {
                // Same bucket - update in place
                candle.add_tick(tick.price);
                self.current = Some(candle);
                Ok(None)
            }
            Some(candle) => {
                // New bucket - seal the open candle and start the next one
                self.sealed_until = Some(candle.bucket_end());
                self.current = Some(Candle::opened(self.resolution, bucket, tick.price));
                Ok(Some(candle.seal()))
            }
            None => {
                self.current = Some(Candle::opened(self.resolution, bucket, tick.price));
                Ok(None)
            }
        }
    }

    /// Seal the open candle if its bucket has fully elapsed at `at`
    pub fn flush_elapsed(&mut self, at: DateTime<Utc>) -> Option<Candle> {
        match self.current.take() {
            Some(candle) if candle.bucket_end() <= at => {
                self.sealed_until = Some(candle.bucket_end());
                Some(candle.seal())
            }
            other => {
                self.current = other;
                None
            }
        }
    }
}

/// Drives the 15m, 5m and 1m aggregators from a single tick stream
#[derive(Debug, Clone)]
pub struct MultiResolutionAggregator {
    aggregators: Vec<CandleAggregator>,
}

impl MultiResolutionAggregator {
    pub fn new(timezone: Tz) -> Self {
        Self {
            aggregators: Resolution::ALL
                .iter()
                .map(|r| CandleAggregator::new(*r, timezone))
                .collect(),
        }
    }

    /// Open candle of a resolution
    pub fn current(&self, resolution: Resolution) -> Option<&Candle> {
        self.aggregators
            .iter()
            .find(|a| a.resolution() == resolution)
            .and_then(|a| a.current())
    }

    /// Feed one tick to every resolution. Closed candles come back
    /// coarsest first. An out-of-order tick mutates nothing.
    pub fn ingest(&mut self, tick: &Tick) -> Result<Vec<Candle>, CoreError> {
        for agg in &self.aggregators {
            agg.check_order(tick)?;
        }

        let mut closed = Vec::new();
        for agg in &mut self.aggregators {
            if let Some(candle) = agg.ingest(tick)? {
                closed.push(candle);
            }
        }
        Ok(closed)
    }

    /// Seal every open candle whose bucket has ended by `at`
    pub fn flush_elapsed(&mut self, at: DateTime<Utc>) -> Vec<Candle> {
        self.aggregators
            .iter_mut()
            .filter_map(|a| a.flush_elapsed(at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;

    fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2024, 3, 4, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_bucket_alignment_in_local_time() {
        let ts = ist(9, 22, 41);
        assert_eq!(Resolution::FifteenMinute.bucket_start(ts, Kolkata), ist(9, 15, 0));
        assert_eq!(Resolution::FiveMinute.bucket_start(ts, Kolkata), ist(9, 20, 0));
        assert_eq!(Resolution::OneMinute.bucket_start(ts, Kolkata), ist(9, 22, 0));

        let with_millis = ts + Duration::milliseconds(750);
        assert_eq!(Resolution::OneMinute.bucket_start(with_millis, Kolkata), ist(9, 22, 0));
    }

    #[test]
    fn test_single_bucket_ohlc() {
        let mut agg = CandleAggregator::new(Resolution::OneMinute, Kolkata);
        let prices = [17400.0, 17410.0, 17390.0, 17405.0, 17402.0];

        for (i, price) in prices.iter().enumerate() {
            let closed = agg.ingest(&Tick::new(ist(10, 0, i as u32 * 10), *price)).unwrap();
            assert!(closed.is_none());
        }

        let candle = agg.current().unwrap();
        assert_eq!(candle.open, 17400.0);
        assert_eq!(candle.high, 17410.0);
        assert_eq!(candle.low, 17390.0);
        assert_eq!(candle.close, 17402.0);
        assert_eq!(candle.tick_count, 5);
        assert!(!candle.is_closed);
    }

    #[test]
    fn test_candle_closes_on_first_tick_of_next_bucket() {
        let mut agg = CandleAggregator::new(Resolution::OneMinute, Kolkata);
        agg.ingest(&Tick::new(ist(10, 0, 5), 100.0)).unwrap();
        agg.ingest(&Tick::new(ist(10, 0, 59), 101.0)).unwrap();

        let closed = agg.ingest(&Tick::new(ist(10, 1, 0), 102.0)).unwrap().unwrap();
        assert!(closed.is_closed);
        assert_eq!(closed.bucket_start, ist(10, 0, 0));
        assert_eq!(closed.close, 101.0);

        // Further ticks in the new bucket do not close anything else
        assert!(agg.ingest(&Tick::new(ist(10, 1, 30), 90.0)).unwrap().is_none());
        let open = agg.current().unwrap();
        assert_eq!(open.bucket_start, ist(10, 1, 0));
        assert_eq!(open.open, 102.0);
        assert_eq!(open.low, 90.0);

        // The candle handed out earlier is unchanged
        assert_eq!(closed.low, 100.0);
    }

    #[test]
    fn test_gap_opens_bucket_of_tick() {
        let mut agg = CandleAggregator::new(Resolution::FiveMinute, Kolkata);
        agg.ingest(&Tick::new(ist(10, 0, 0), 100.0)).unwrap();

        // Nothing between 10:05 and 10:20
        let closed = agg.ingest(&Tick::new(ist(10, 21, 0), 105.0)).unwrap().unwrap();
        assert_eq!(closed.bucket_start, ist(10, 0, 0));

        let open = agg.current().unwrap();
        assert_eq!(open.bucket_start, ist(10, 20, 0));
        assert_eq!(open.open, 105.0);
        assert_eq!(open.high, 105.0);
        assert_eq!(open.low, 105.0);
    }

    #[test]
    fn test_out_of_order_tick_rejected() {
        let mut multi = MultiResolutionAggregator::new(Kolkata);
        multi.ingest(&Tick::new(ist(10, 2, 10), 100.0)).unwrap();

        // Same 5m/15m bucket but an older 1m bucket
        let err = multi.ingest(&Tick::new(ist(10, 1, 50), 150.0)).unwrap_err();
        assert!(matches!(err, CoreError::OutOfOrderTick { .. }));

        // No resolution saw the stale price
        for r in Resolution::ALL {
            let candle = multi.current(r).unwrap();
            assert_eq!(candle.high, 100.0);
            assert_eq!(candle.tick_count, 1);
        }
    }

    #[test]
    fn test_multi_resolution_close_order() {
        let mut multi = MultiResolutionAggregator::new(Kolkata);
        multi.ingest(&Tick::new(ist(9, 29, 30), 100.0)).unwrap();

        let closed = multi.ingest(&Tick::new(ist(9, 30, 0), 101.0)).unwrap();
        let resolutions: Vec<_> = closed.iter().map(|c| c.resolution).collect();
        assert_eq!(
            resolutions,
            vec![Resolution::FifteenMinute, Resolution::FiveMinute, Resolution::OneMinute]
        );
    }

    #[test]
    fn test_flush_elapsed_only_seals_finished_buckets() {
        let mut multi = MultiResolutionAggregator::new(Kolkata);
        multi.ingest(&Tick::new(ist(15, 29, 10), 100.0)).unwrap();

        assert!(multi.flush_elapsed(ist(15, 29, 59)).is_empty());

        let flushed = multi.flush_elapsed(ist(15, 30, 0));
        assert_eq!(flushed.len(), 3);
        assert!(flushed.iter().all(|c| c.is_closed));
        assert!(multi.current(Resolution::OneMinute).is_none());
    }

    #[test]
    fn test_flushed_bucket_cannot_reopen() {
        let mut multi = MultiResolutionAggregator::new(Kolkata);
        multi.ingest(&Tick::new(ist(15, 29, 10), 100.0)).unwrap();
        multi.flush_elapsed(ist(15, 30, 0));

        let err = multi.ingest(&Tick::new(ist(15, 29, 5), 90.0)).unwrap_err();
        assert!(matches!(err, CoreError::OutOfOrderTick { bucket_start, .. } if bucket_start == ist(15, 30, 0)));
        for r in Resolution::ALL {
            assert!(multi.current(r).is_none());
        }

        // The next bucket is still open for business
        assert!(multi.ingest(&Tick::new(ist(15, 30, 0), 95.0)).is_ok());
    }

    #[test]
    fn test_candle_colour_and_touch() {
        let candle = Candle {
            resolution: Resolution::OneMinute,
            bucket_start: ist(10, 0, 0),
            open: 17402.0,
            high: 17412.0,
            low: 17395.0,
            close: 17410.0,
            is_closed: true,
            tick_count: 4,
        };
        assert!(candle.is_green());
        assert!(!candle.is_red());
        assert!(candle.touches(17400.0));
        assert!(candle.touches(17395.0));
        assert!(candle.touches(17412.0));
        assert!(!candle.touches(17413.0));
    }
}
