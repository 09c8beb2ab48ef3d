use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons the core refuses a tick or a session.
///
/// Tick-level variants mean "dropped, nothing changed". `BaselineUnavailable`
/// is fatal for the trading day; every later tick gets `SessionHalted`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("malformed tick: {0}")]
    MalformedTick(String),

    #[error("out-of-order tick at {tick} (accepting ticks from {bucket_start})")]
    OutOfOrderTick {
        tick: DateTime<Utc>,
        bucket_start: DateTime<Utc>,
    },

    #[error("tick at {0} is outside market hours")]
    OutsideSession(DateTime<Utc>),

    #[error("baseline unavailable: {0}")]
    BaselineUnavailable(String),

    #[error("session halted for the day: baseline was never established")]
    SessionHalted,

    #[error("tick at {0} arrived after the session ended")]
    SessionEnded(DateTime<Utc>),
}

impl CoreError {
    /// True for the kinds that only drop a single tick.
    pub fn is_tick_drop(&self) -> bool {
        matches!(
            self,
            CoreError::MalformedTick(_)
                | CoreError::OutOfOrderTick { .. }
                | CoreError::OutsideSession(_)
                | CoreError::SessionEnded(_)
        )
    }
}
