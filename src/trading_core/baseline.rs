//! Baseline (opening range) capture
//!
//! The high/low of the session's first 15-minute candle are the breakout
//! reference levels. When the process starts after the opening range has
//! elapsed, the same two numbers come from historical candles instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::candles::{Candle, HistoricalCandle, Resolution};
use super::state_machine::{Phase, StateTransition, StrategyState};
use crate::error::CoreError;

/// Where the baseline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineSource {
    Live,
    Backfill,
}

/// Breakout reference levels for one trading day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineLevels {
    pub high: f64,
    pub low: f64,
    pub source: BaselineSource,
}

impl BaselineLevels {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Reduce historical candles inside `[window_start, window_end)` to a baseline
    pub fn from_backfill(
        candles: &[HistoricalCandle],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let in_window: Vec<_> = candles
            .iter()
            .filter(|c| c.bucket_start >= window_start && c.bucket_end() <= window_end)
            .collect();

        if in_window.is_empty() {
            return Err(CoreError::BaselineUnavailable(format!(
                "no historical candles between {} and {}",
                window_start, window_end
            )));
        }

        let high = in_window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = in_window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        if !high.is_finite() || !low.is_finite() || low <= 0.0 || low > high {
            return Err(CoreError::BaselineUnavailable(format!(
                "historical candles produced invalid bounds H={} L={}",
                high, low
            )));
        }

        Ok(Self {
            high,
            low,
            source: BaselineSource::Backfill,
        })
    }
}

/// Handle a closed 15-minute candle while awaiting the baseline.
///
/// Only the candle of the opening bucket qualifies; a first 15m close from
/// any later bucket means the opening range was missed.
pub fn on_candle_closed(
    state: &mut StrategyState,
    candle: &Candle,
    opening_bucket: DateTime<Utc>,
) -> Result<Option<StateTransition>, CoreError> {
    if state.phase != Phase::AwaitingBaseline || candle.resolution != Resolution::FifteenMinute {
        return Ok(None);
    }

    if candle.bucket_start != opening_bucket {
        return Err(CoreError::BaselineUnavailable(format!(
            "first 15m candle starts at {}, opening range starts at {}",
            candle.bucket_start, opening_bucket
        )));
    }

    let levels = BaselineLevels {
        high: candle.high,
        low: candle.low,
        source: BaselineSource::Live,
    };
    Ok(Some(install(state, levels)))
}

/// Seed the baseline from backfill before any live tick is processed
pub fn seed(state: &mut StrategyState, levels: BaselineLevels) -> Option<StateTransition> {
    if state.phase != Phase::AwaitingBaseline {
        return None;
    }
    Some(install(state, levels))
}

fn install(state: &mut StrategyState, levels: BaselineLevels) -> StateTransition {
    info!(
        "BASELINE ({:?}): H={:.2} L={:.2} range={:.2}",
        levels.source,
        levels.high,
        levels.low,
        levels.range()
    );
    state.baseline = Some(levels);
    state.phase = Phase::MonitoringBreakout;
    StateTransition::BaselineCaptured(levels)
}
