//! Signal Engine
//!
//! Session-scoped owner of the aggregator and the strategy state. Used by
//! both the live driver (stdin feed) and replay (CSV ticks). Contains no
//! I/O; every time decision is keyed off tick timestamps or the explicit
//! `end_session` call.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::baseline::{self, BaselineLevels};
use super::candles::{Candle, HistoricalCandle, MultiResolutionAggregator, Resolution};
use super::session::SessionConfig;
use super::signal::Signal;
use super::state_machine::{BreakoutDirection, Phase, SessionOutcome, StateTransition, StrategyState};
use super::ticks::{self, RawTick, Tick};
use crate::error::CoreError;

/// Point-in-time view of the engine, served by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub symbol: String,
    pub session_date: Option<NaiveDate>,
    pub phase: Phase,
    pub baseline: Option<BaselineLevels>,
    pub breakout_direction: BreakoutDirection,
    pub breakout_level: Option<f64>,
    pub retest_touched: bool,
    pub halted: bool,
    pub last_price: Option<f64>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub session_high: Option<f64>,
    pub session_low: Option<f64>,
    pub ticks_processed: u64,
    pub ticks_dropped: u64,
    pub signal: Option<Signal>,
}

pub struct SignalEngine {
    config: SessionConfig,
    aggregator: MultiResolutionAggregator,
    state: StrategyState,
    session_date: Option<NaiveDate>,
    halted: bool,
    ended: bool,

    // Statistics
    ticks_processed: u64,
    ticks_dropped: u64,
    last_price: Option<f64>,
    last_tick_at: Option<DateTime<Utc>>,
    session_high: Option<f64>,
    session_low: Option<f64>,
}

impl SignalEngine {
    pub fn new(config: SessionConfig) -> Self {
        let aggregator = MultiResolutionAggregator::new(config.timezone);
        Self {
            config,
            aggregator,
            state: StrategyState::new(),
            session_date: None,
            halted: false,
            ended: false,
            ticks_processed: 0,
            ticks_dropped: 0,
            last_price: None,
            last_tick_at: None,
            session_high: None,
            session_low: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        self.session_date
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Discard everything from the previous day and start fresh for `date`
    pub fn begin_session(&mut self, date: NaiveDate) {
        if let Some(previous) = self.session_date {
            info!(
                "NEW DAY: {} -> {} | previous phase {}",
                previous, date, self.state.phase
            );
        } else {
            info!("SESSION START: {} {}", self.config.symbol, date);
        }

        self.aggregator = MultiResolutionAggregator::new(self.config.timezone);
        self.state = StrategyState::new();
        self.session_date = Some(date);
        self.halted = false;
        self.ended = false;
        self.session_high = None;
        self.session_low = None;
    }

    /// Seed the opening range from historical candles for a session that
    /// starts after the range has elapsed. Call before feeding live ticks.
    pub fn seed_baseline(
        &mut self,
        date: NaiveDate,
        candles: &[HistoricalCandle],
    ) -> Result<Option<StateTransition>, CoreError> {
        if self.session_date != Some(date) {
            self.begin_session(date);
        }

        let levels = BaselineLevels::from_backfill(
            candles,
            self.config.session_open(date),
            self.config.baseline_end(date),
        )?;
        Ok(baseline::seed(&mut self.state, levels))
    }

    /// Normalize a raw feed message and ingest it
    pub fn ingest_raw(&mut self, raw: &RawTick) -> Result<Vec<StateTransition>, CoreError> {
        match ticks::normalize(raw, &self.config) {
            Ok(tick) => self.ingest(tick),
            Err(e) => {
                self.ticks_dropped += 1;
                Err(e)
            }
        }
    }

    /// Process one tick. Rejected ticks leave the session untouched.
    pub fn ingest(&mut self, tick: Tick) -> Result<Vec<StateTransition>, CoreError> {
        let result = self.ingest_inner(tick);
        match &result {
            Ok(_) => {
                self.ticks_processed += 1;
                self.last_price = Some(tick.price);
                self.last_tick_at = Some(tick.timestamp);
                self.session_high = Some(self.session_high.map_or(tick.price, |h| h.max(tick.price)));
                self.session_low = Some(self.session_low.map_or(tick.price, |l| l.min(tick.price)));
            }
            Err(e) if e.is_tick_drop() => {
                self.ticks_dropped += 1;
            }
            Err(_) => {}
        }
        result
    }

    fn ingest_inner(&mut self, tick: Tick) -> Result<Vec<StateTransition>, CoreError> {
        tick.validate()?;
        if !self.config.is_market_hours(tick.timestamp) {
            return Err(CoreError::OutsideSession(tick.timestamp));
        }

        let date = self.config.local_date(tick.timestamp);
        if self.session_date != Some(date) {
            self.begin_session(date);
        }

        if self.halted {
            return Err(CoreError::SessionHalted);
        }
        if self.ended {
            return Err(CoreError::SessionEnded(tick.timestamp));
        }

        self.check_baseline_reachable(&tick, date)?;

        let closed = self.aggregator.ingest(&tick)?;
        self.process_closed(&closed)
    }

    /// Past the opening range with no opening-bucket candle in progress, the
    /// live baseline can no longer be formed.
    fn check_baseline_reachable(&mut self, tick: &Tick, date: NaiveDate) -> Result<(), CoreError> {
        if self.state.phase != Phase::AwaitingBaseline {
            return Ok(());
        }
        if tick.timestamp < self.config.baseline_end(date) {
            return Ok(());
        }

        let opening = self.config.session_open(date);
        let has_opening_candle = self
            .aggregator
            .current(Resolution::FifteenMinute)
            .map(|c| c.bucket_start == opening)
            .unwrap_or(false);

        if has_opening_candle {
            return Ok(());
        }

        self.halted = true;
        let err = CoreError::BaselineUnavailable(format!(
            "session joined at {} after the opening range with no backfill",
            self.config.local_time(tick.timestamp).format("%H:%M:%S")
        ));
        warn!("{}", err);
        Err(err)
    }

    fn process_closed(&mut self, closed: &[Candle]) -> Result<Vec<StateTransition>, CoreError> {
        let mut transitions = Vec::new();
        for candle in closed {
            debug!(
                "{} candle closed {} | O={:.2} H={:.2} L={:.2} C={:.2} ({} ticks)",
                candle.resolution,
                candle.bucket_start.format("%H:%M"),
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.tick_count
            );

            match self.state.process_candle(candle, &self.config) {
                Ok(mut t) => transitions.append(&mut t),
                Err(e) => {
                    self.halted = true;
                    warn!("{}", e);
                    return Err(e);
                }
            }
        }
        Ok(transitions)
    }

    /// Explicit session-end event. Candles whose bucket has elapsed by `at`
    /// are sealed and evaluated first. Only the first call per session
    /// produces `SessionEnded`.
    pub fn end_session(&mut self, at: DateTime<Utc>) -> Vec<StateTransition> {
        if self.ended || self.session_date.is_none() {
            return Vec::new();
        }

        let mut transitions = Vec::new();
        if !self.halted {
            let closed = self.aggregator.flush_elapsed(at);
            match self.process_closed(&closed) {
                Ok(mut t) => transitions.append(&mut t),
                Err(e) => debug!("flush at session end: {}", e),
            }
        }

        let outcome = self.outcome();
        self.ended = true;

        match outcome {
            SessionOutcome::SignalEmitted => info!("SESSION END: signal emitted"),
            SessionOutcome::RetestPending => info!(
                "SESSION END: breakout {} @ {:.2} never confirmed",
                self.state.breakout_direction, self.state.breakout_level
            ),
            SessionOutcome::NoBreakout => info!("SESSION END: no breakout today"),
            SessionOutcome::AwaitingBaseline => info!("SESSION END: opening range never completed"),
            SessionOutcome::BaselineUnavailable => warn!("SESSION END: baseline unavailable"),
        }
        info!(
            "SESSION STATS: {} ticks processed, {} dropped",
            self.ticks_processed, self.ticks_dropped
        );

        transitions.push(StateTransition::SessionEnded { outcome });
        transitions
    }

    pub fn outcome(&self) -> SessionOutcome {
        if self.halted {
            SessionOutcome::BaselineUnavailable
        } else {
            SessionOutcome::from_phase(self.state.phase)
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            symbol: self.config.symbol.clone(),
            session_date: self.session_date,
            phase: self.state.phase,
            baseline: self.state.baseline,
            breakout_direction: self.state.breakout_direction,
            breakout_level: (self.state.breakout_direction != BreakoutDirection::None)
                .then_some(self.state.breakout_level),
            retest_touched: self.state.retest_touched,
            halted: self.halted,
            last_price: self.last_price,
            last_tick_at: self.last_tick_at,
            session_high: self.session_high,
            session_low: self.session_low,
            ticks_processed: self.ticks_processed,
            ticks_dropped: self.ticks_dropped,
            signal: self.state.signal.clone(),
        }
    }
}
