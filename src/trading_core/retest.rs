//! Retest and confirmation on closed 1-minute candles
//!
//! After a breakout, wait for a 1m candle whose range includes the broken
//! level. Once touched, the first 1m candle closing back on the breakout side
//! with the breakout colour confirms. The touching candle can confirm itself.

use tracing::info;

use super::candles::{Candle, Resolution};
use super::session::SessionConfig;
use super::signal;
use super::state_machine::{BreakoutDirection, Phase, StateTransition, StrategyState};

/// Whether a candle confirms a retest for the given side
pub fn is_confirmation(direction: BreakoutDirection, level: f64, candle: &Candle) -> bool {
    match direction {
        BreakoutDirection::Bullish => candle.is_green() && candle.close > level,
        BreakoutDirection::Bearish => candle.is_red() && candle.close < level,
        BreakoutDirection::None => false,
    }
}

/// Handle a closed 1m candle while awaiting the retest.
///
/// Only 1m candles starting at or after the breakout 5m candle's end count,
/// so the breakout bucket's final minute is excluded even though it closes
/// on the same tick as the breakout candle.
pub fn on_candle_closed(
    state: &mut StrategyState,
    candle: &Candle,
    config: &SessionConfig,
) -> Vec<StateTransition> {
    let mut transitions = Vec::new();

    if state.phase != Phase::AwaitingRetest || candle.resolution != Resolution::OneMinute {
        return transitions;
    }
    // 1m candles overlapping the breakout bucket do not count
    match state.breakout_at {
        Some(at) if candle.bucket_start >= at => {}
        _ => return transitions,
    }

    let level = state.breakout_level;

    if !state.retest_touched && candle.touches(level) {
        state.retest_touched = true;
        state.touched_at = Some(candle.bucket_start);
        info!(
            "STATE: RETEST TOUCH {:.2} | 1m L={:.2} H={:.2} | candle {}",
            level,
            candle.low,
            candle.high,
            candle.bucket_start.format("%H:%M")
        );
        transitions.push(StateTransition::RetestTouched {
            level,
            candle_start: candle.bucket_start,
        });
    }

    if state.retest_touched && is_confirmation(state.breakout_direction, level, candle) {
        if let Some(signal) = signal::emit(state, candle, config) {
            state.phase = Phase::Confirmed;
            state.signal = Some(signal.clone());
            transitions.push(StateTransition::SignalEmitted(signal));
        }
    }

    transitions
}
