//! Breakout detection on closed 5-minute candles

use chrono::{DateTime, Utc};
use tracing::info;

use super::baseline::BaselineLevels;
use super::candles::{Candle, Resolution};
use super::state_machine::{BreakoutDirection, Phase, StateTransition, StrategyState};

/// Classify a close against the opening range.
/// Returns the direction and the broken bound; a close equal to a bound is inside.
pub fn check_breakout(baseline: &BaselineLevels, close: f64) -> Option<(BreakoutDirection, f64)> {
    if close > baseline.high {
        return Some((BreakoutDirection::Bullish, baseline.high));
    }
    if close < baseline.low {
        return Some((BreakoutDirection::Bearish, baseline.low));
    }
    None
}

/// Handle a closed 5m candle while monitoring for the breakout.
///
/// Candles that started inside the opening range window are skipped.
pub fn on_candle_closed(
    state: &mut StrategyState,
    candle: &Candle,
    baseline_end: DateTime<Utc>,
) -> Option<StateTransition> {
    if state.phase != Phase::MonitoringBreakout || candle.resolution != Resolution::FiveMinute {
        return None;
    }
    if candle.bucket_start < baseline_end {
        return None;
    }

    let baseline = state.baseline?;
    let (direction, level) = check_breakout(&baseline, candle.close)?;
    let at = candle.bucket_end();

    state.breakout_direction = direction;
    state.breakout_level = level;
    state.breakout_close = Some(candle.close);
    state.breakout_at = Some(at);
    state.phase = Phase::AwaitingRetest;

    info!(
        "STATE: BREAKOUT {} | 5m close {:.2} vs level {:.2} | candle {}",
        direction,
        candle.close,
        level,
        candle.bucket_start.format("%H:%M")
    );

    Some(StateTransition::BreakoutDetected {
        direction,
        level,
        close: candle.close,
        at,
    })
}
