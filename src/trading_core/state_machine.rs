//! Breakout/Retest State Machine
//!
//! One `StrategyState` per trading day, advanced only by closed candles:
//! 1. AWAITING_BASELINE - first 15m candle becomes the opening range
//! 2. MONITORING_BREAKOUT - 5m close strictly beyond the range
//! 3. AWAITING_RETEST - 1m touch of the broken level, then a confirming close
//! 4. CONFIRMED - signal emitted, terminal for the day

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::baseline::{self, BaselineLevels};
use super::breakout;
use super::candles::{Candle, Resolution};
use super::retest;
use super::session::SessionConfig;
use super::signal::Signal;
use crate::error::CoreError;

/// Phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    AwaitingBaseline,
    MonitoringBreakout,
    AwaitingRetest,
    Confirmed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::AwaitingBaseline => write!(f, "AWAITING_BASELINE"),
            Phase::MonitoringBreakout => write!(f, "MONITORING_BREAKOUT"),
            Phase::AwaitingRetest => write!(f, "AWAITING_RETEST"),
            Phase::Confirmed => write!(f, "CONFIRMED"),
        }
    }
}

/// Side the opening range was broken on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutDirection {
    None,
    Bullish,
    Bearish,
}

impl std::fmt::Display for BreakoutDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakoutDirection::None => write!(f, "NONE"),
            BreakoutDirection::Bullish => write!(f, "BULLISH"),
            BreakoutDirection::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// How a session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Retest confirmed and a signal went out
    SignalEmitted,
    /// Breakout seen, retest never confirmed
    RetestPending,
    /// Price never closed outside the opening range
    NoBreakout,
    /// Session ended before the opening range completed
    AwaitingBaseline,
    /// Opening range could not be established
    BaselineUnavailable,
}

impl SessionOutcome {
    pub fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::AwaitingBaseline => SessionOutcome::AwaitingBaseline,
            Phase::MonitoringBreakout => SessionOutcome::NoBreakout,
            Phase::AwaitingRetest => SessionOutcome::RetestPending,
            Phase::Confirmed => SessionOutcome::SignalEmitted,
        }
    }
}

/// State transition events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StateTransition {
    /// Opening range established
    BaselineCaptured(BaselineLevels),
    /// 5m close beyond the opening range
    BreakoutDetected {
        direction: BreakoutDirection,
        level: f64,
        close: f64,
        at: DateTime<Utc>,
    },
    /// 1m candle range included the breakout level
    RetestTouched {
        level: f64,
        candle_start: DateTime<Utc>,
    },
    /// Retest confirmed, signal raised
    SignalEmitted(Signal),
    /// Market close reached
    SessionEnded { outcome: SessionOutcome },
}

/// The session's single mutable strategy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub phase: Phase,
    pub baseline: Option<BaselineLevels>,
    pub breakout_direction: BreakoutDirection,
    pub breakout_level: f64,
    /// Close of the breakout 5m candle
    pub breakout_close: Option<f64>,
    /// End of the breakout 5m bucket; retest only looks at later 1m candles
    pub breakout_at: Option<DateTime<Utc>>,
    pub retest_touched: bool,
    pub touched_at: Option<DateTime<Utc>>,
    pub signal: Option<Signal>,
}

impl Default for StrategyState {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyState {
    /// Fresh state for a new trading day
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingBaseline,
            baseline: None,
            breakout_direction: BreakoutDirection::None,
            breakout_level: 0.0,
            breakout_close: None,
            breakout_at: None,
            retest_touched: false,
            touched_at: None,
            signal: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.phase == Phase::Confirmed
    }

    /// Route a closed candle to the component active in the current phase
    pub fn process_candle(
        &mut self,
        candle: &Candle,
        config: &SessionConfig,
    ) -> Result<Vec<StateTransition>, CoreError> {
        let date = config.local_date(candle.bucket_start);

        let transitions = match (self.phase, candle.resolution) {
            (Phase::AwaitingBaseline, Resolution::FifteenMinute) => {
                baseline::on_candle_closed(self, candle, config.session_open(date))?
                    .into_iter()
                    .collect()
            }
            (Phase::MonitoringBreakout, Resolution::FiveMinute) => {
                breakout::on_candle_closed(self, candle, config.baseline_end(date))
                    .into_iter()
                    .collect()
            }
            (Phase::AwaitingRetest, Resolution::OneMinute) => {
                retest::on_candle_closed(self, candle, config)
            }
            // Confirmed is terminal; other resolutions are not watched in this phase
            _ => Vec::new(),
        };

        Ok(transitions)
    }
}
