use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::backfill::parse_timestamp;
use crate::trading_core::{
    HistoricalCandle, SessionOutcome, Signal, SignalEngine, StateTransition, Tick,
};

#[derive(Debug, Deserialize)]
struct TickRow {
    timestamp: String,
    price: f64,
}

/// Result of one replayed trading day
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub date: NaiveDate,
    pub outcome: SessionOutcome,
    pub signal: Option<Signal>,
    pub transitions: Vec<StateTransition>,
}

/// Read ticks from CSV with header `timestamp,price`
pub fn read_ticks_csv<R: Read>(reader: R) -> Result<Vec<Tick>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut ticks = Vec::new();

    for result in csv_reader.deserialize() {
        let row: TickRow = result.with_context(|| "Failed to parse CSV tick row")?;
        ticks.push(Tick::new(parse_timestamp(&row.timestamp)?, row.price));
    }

    Ok(ticks)
}

pub fn load_ticks_csv(path: &Path) -> Result<Vec<Tick>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    read_ticks_csv(file)
}

/// Replay mode: feed recorded ticks through the engine, ending each
/// session at its market close
pub fn run_replay(
    engine: &mut SignalEngine,
    ticks: &[Tick],
    backfill: Option<&[HistoricalCandle]>,
) -> Result<Vec<SessionReport>> {
    let config = engine.config().clone();
    let mut reports = Vec::new();
    let mut transitions: Vec<StateTransition> = Vec::new();
    let mut dropped = 0usize;

    if let (Some(candles), Some(first)) = (backfill, ticks.first()) {
        let date = config.local_date(first.timestamp);
        match engine.seed_baseline(date, candles) {
            Ok(t) => transitions.extend(t),
            Err(e) => warn!("Backfill for {} failed: {}", date, e),
        }
    }

    info!("Replaying {} ticks", ticks.len());

    for tick in ticks {
        // A tick on a later day closes the previous session first
        if let Some(date) = engine.session_date() {
            if config.is_market_hours(tick.timestamp) && config.local_date(tick.timestamp) != date {
                transitions.extend(engine.end_session(config.session_close(date)));
                reports.push(report(date, engine, std::mem::take(&mut transitions)));
            }
        }

        match engine.ingest(*tick) {
            Ok(t) => transitions.extend(t),
            Err(e) if e.is_tick_drop() => {
                dropped += 1;
                debug!("Tick dropped: {}", e);
            }
            Err(e) => debug!("Tick rejected: {}", e),
        }
    }

    if let Some(date) = engine.session_date() {
        transitions.extend(engine.end_session(config.session_close(date)));
        reports.push(report(date, engine, transitions));
    }

    info!("Replay complete: {} sessions, {} ticks dropped", reports.len(), dropped);
    Ok(reports)
}

fn report(date: NaiveDate, engine: &SignalEngine, transitions: Vec<StateTransition>) -> SessionReport {
    SessionReport {
        date,
        outcome: engine.outcome(),
        signal: engine.state().signal.clone(),
        transitions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::{OptionType, SessionConfig};

    const DAY: &str = "timestamp,price\n\
        2024-03-04T09:15:00+05:30,17350\n\
        2024-03-04T09:18:00+05:30,17400\n\
        2024-03-04T09:22:00+05:30,17300\n\
        2024-03-04T09:30:00+05:30,17360\n\
        2024-03-04T10:00:00+05:30,17395\n\
        2024-03-04T10:04:50+05:30,17420\n\
        2024-03-04T10:05:00+05:30,17404\n\
        2024-03-04T10:05:20+05:30,17405\n\
        2024-03-04T10:05:40+05:30,17395\n\
        2024-03-04T10:05:50+05:30,17398\n\
        2024-03-04T10:06:00+05:30,17402\n\
        2024-03-04T10:06:50+05:30,17410\n\
        2024-03-04T10:07:00+05:30,17411\n";

    #[test]
    fn test_replay_bullish_day() {
        let ticks = read_ticks_csv(DAY.as_bytes()).unwrap();
        let mut engine = SignalEngine::new(SessionConfig::default());

        let reports = run_replay(&mut engine, &ticks, None).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, SessionOutcome::SignalEmitted);

        let signal = reports[0].signal.as_ref().unwrap();
        assert_eq!(signal.direction, OptionType::CE);
        assert_eq!(signal.strike, 17400);
        assert!(matches!(
            reports[0].transitions.last(),
            Some(StateTransition::SessionEnded { outcome: SessionOutcome::SignalEmitted })
        ));
    }

    #[test]
    fn test_replay_splits_days() {
        let mut data = DAY.to_string();
        data.push_str("2024-03-05T09:16:00+05:30,17500\n");
        let ticks = read_ticks_csv(data.as_bytes()).unwrap();
        let mut engine = SignalEngine::new(SessionConfig::default());

        let reports = run_replay(&mut engine, &ticks, None).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].outcome, SessionOutcome::SignalEmitted);
        assert_eq!(reports[1].date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        // Lone tick on day two still forms an opening range at the close flush
        assert_eq!(reports[1].outcome, SessionOutcome::NoBreakout);
        assert!(reports[1].signal.is_none());
    }

    #[test]
    fn test_replay_late_start_without_backfill() {
        let data = "timestamp,price\n2024-03-04T11:00:00+05:30,17400\n2024-03-04T11:01:00+05:30,17410\n";
        let ticks = read_ticks_csv(data.as_bytes()).unwrap();
        let mut engine = SignalEngine::new(SessionConfig::default());

        let reports = run_replay(&mut engine, &ticks, None).unwrap();
        assert_eq!(reports[0].outcome, SessionOutcome::BaselineUnavailable);
    }
}
