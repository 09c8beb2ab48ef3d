//! Trading Core - opening-range breakout/retest strategy
//!
//! This module contains the broker- and feed-agnostic strategy components:
//! - Tick normalization and session calendar
//! - Candle aggregation at 15m, 5m and 1m
//! - Baseline (opening range) capture, live or from backfill
//! - Breakout detection and retest confirmation
//! - Option signal derivation
//! - Session engine orchestration

pub mod session;
pub mod ticks;
pub mod candles;
pub mod baseline;
pub mod breakout;
pub mod retest;
pub mod signal;
pub mod state_machine;
pub mod engine;

// Re-export commonly used types
pub use session::{is_trading_day, SessionConfig};
pub use ticks::{RawTick, Tick};
pub use candles::{Candle, CandleAggregator, HistoricalCandle, MultiResolutionAggregator, Resolution};
pub use baseline::{BaselineLevels, BaselineSource};
pub use signal::{OptionType, Signal};
pub use state_machine::{BreakoutDirection, Phase, SessionOutcome, StateTransition, StrategyState};
pub use engine::{SignalEngine, StatusSnapshot};
