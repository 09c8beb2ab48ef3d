//! Option signal derived from a confirmed retest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::baseline::BaselineLevels;
use super::candles::Candle;
use super::session::SessionConfig;
use super::state_machine::{BreakoutDirection, StrategyState};

/// Option side to buy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    /// Call, after a bullish breakout
    CE,
    /// Put, after a bearish breakout
    PE,
}

impl OptionType {
    pub fn from_direction(direction: BreakoutDirection) -> Option<Self> {
        match direction {
            BreakoutDirection::Bullish => Some(OptionType::CE),
            BreakoutDirection::Bearish => Some(OptionType::PE),
            BreakoutDirection::None => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::CE => write!(f, "CE"),
            OptionType::PE => write!(f, "PE"),
        }
    }
}

/// The one actionable output of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: OptionType,
    pub strike: i64,
    pub breakout_level: f64,
    /// End of the confirming 1m candle
    pub confirmed_at: DateTime<Utc>,
    pub confirm_close: f64,
    pub baseline: Option<BaselineLevels>,
}

/// Nearest multiple of `step`; exact midpoints round up
pub fn strike_for(level: f64, step: f64) -> i64 {
    ((level / step).round() * step) as i64
}

/// Build the signal for a confirmed retest
pub fn emit(state: &StrategyState, candle: &Candle, config: &SessionConfig) -> Option<Signal> {
    let direction = OptionType::from_direction(state.breakout_direction)?;
    let strike = strike_for(state.breakout_level, config.strike_step);

    let signal = Signal {
        id: Uuid::new_v4(),
        symbol: config.symbol.clone(),
        direction,
        strike,
        breakout_level: state.breakout_level,
        confirmed_at: candle.bucket_end(),
        confirm_close: candle.close,
        baseline: state.baseline,
    };

    info!(
        "SIGNAL: BUY {} {} {} | level {:.2} | confirm close {:.2} @ {}",
        signal.symbol,
        signal.strike,
        signal.direction,
        signal.breakout_level,
        signal.confirm_close,
        signal.confirmed_at.format("%H:%M:%S")
    );

    Some(signal)
}
