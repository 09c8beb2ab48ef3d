use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::notify::{self, Notification, NotificationQueue, Priority};
use crate::trading_core::{RawTick, SessionConfig, SignalEngine, StateTransition, StatusSnapshot};
use crate::types::AppState;

/// Capacity of the feed -> engine channel
pub const FEED_CHANNEL_CAPACITY: usize = 4096;

/// Monitoring reports are only sent while a tick arrived this recently
pub const FEED_ACTIVE_WINDOW_SECS: i64 = 60;

/// Everything the engine task reacts to, in arrival order
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick(RawTick),
    /// Market close reached for the current session
    SessionClose(DateTime<Utc>),
}

/// Live mode: newline-delimited JSON ticks from `reader` until EOF
pub async fn run_live_feed<R>(
    engine: SignalEngine,
    reader: R,
    state: Arc<AppState>,
    notifications: NotificationQueue,
    watchdog_period: Duration,
    monitor_period: Duration,
) -> Result<SignalEngine>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineEvent>(FEED_CHANNEL_CAPACITY);

    let reader_task = tokio::spawn(read_feed(reader, tx.clone()));
    let watchdog = tokio::spawn(close_watchdog(engine.config().clone(), tx.clone(), watchdog_period));
    drop(tx);
    let monitor = tokio::spawn(monitor_status(
        state.clone(),
        notifications.clone(),
        engine.config().timezone,
        monitor_period,
    ));

    let engine_task = tokio::spawn(run_engine(engine, rx, state, notifications));

    let lines = reader_task.await.context("Feed reader task panicked")??;
    info!("Feed ended after {} lines", lines);

    // Closing the last sender lets the engine drain and stop
    watchdog.abort();
    monitor.abort();
    let engine = engine_task.await.context("Engine task panicked")?;
    Ok(engine)
}

/// Parse JSON lines into raw ticks and forward them to the engine
pub async fn read_feed<R>(reader: R, tx: mpsc::Sender<EngineEvent>) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read feed line")? {
        count += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<RawTick>(line) {
            Ok(raw) => {
                if tx.send(EngineEvent::Tick(raw)).await.is_err() {
                    warn!("Engine task stopped, feed reader exiting");
                    break;
                }
            }
            Err(e) => warn!("Unparseable feed line {}: {}", count, e),
        }
    }

    Ok(count)
}

/// Wall-clock check that raises the session-end event once per day
pub async fn close_watchdog(config: SessionConfig, tx: mpsc::Sender<EngineEvent>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut closed_for: Option<NaiveDate> = None;

    loop {
        interval.tick().await;
        let now = Utc::now();
        let date = config.local_date(now);
        let close = config.session_close(date);

        if now >= close && closed_for != Some(date) {
            closed_for = Some(date);
            info!("Market close reached for {}", date);
            if tx.send(EngineEvent::SessionClose(close)).await.is_err() {
                break;
            }
        }
    }
}

/// Periodically report the published status while the feed is active
pub async fn monitor_status(
    state: Arc<AppState>,
    notifications: NotificationQueue,
    timezone: Tz,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    // First tick completes immediately; nothing to report yet
    interval.tick().await;

    loop {
        interval.tick().await;
        let status = state.status.read().await.clone();
        let now = Utc::now();

        match monitoring_notification(&status, timezone, now, now - state.started_at) {
            Some(notification) => notifications.push(notification),
            None => debug!("Feed idle, monitoring report skipped"),
        }
    }
}

/// Monitoring report for `status`, or `None` when no tick arrived within
/// the active window
pub fn monitoring_notification(
    status: &StatusSnapshot,
    timezone: Tz,
    now: DateTime<Utc>,
    uptime: chrono::Duration,
) -> Option<Notification> {
    let last = status.last_tick_at?;
    if now - last > chrono::Duration::seconds(FEED_ACTIVE_WINDOW_SECS) {
        return None;
    }
    Some(Notification::new(
        notify::monitoring_message(status, timezone, now, uptime),
        Priority::Normal,
    ))
}

/// Single owner of the engine; applies events in order and publishes status
pub async fn run_engine(
    mut engine: SignalEngine,
    mut rx: mpsc::Receiver<EngineEvent>,
    state: Arc<AppState>,
    notifications: NotificationQueue,
) -> SignalEngine {
    let timezone = engine.config().timezone;

    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Tick(raw) => match engine.ingest_raw(&raw) {
                Ok(transitions) => dispatch(&transitions, &notifications, timezone),
                Err(e) => report_error(&e, &notifications, &engine),
            },
            EngineEvent::SessionClose(at) => {
                // A close for another day must not end the session in progress
                if engine.session_date() == Some(engine.config().local_date(at)) {
                    let transitions = engine.end_session(at);
                    dispatch(&transitions, &notifications, timezone);
                } else {
                    debug!("Ignoring market close {} for another session", at);
                }
            }
        }

        *state.status.write().await = engine.status();
    }

    debug!("Engine task stopped");
    engine
}

fn dispatch(transitions: &[StateTransition], notifications: &NotificationQueue, timezone: Tz) {
    for transition in transitions {
        if let Some(notification) = notify::for_transition(transition, timezone) {
            notifications.push(notification);
        }
    }
}

fn report_error(e: &CoreError, notifications: &NotificationQueue, engine: &SignalEngine) {
    match e {
        CoreError::OutsideSession(_) | CoreError::SessionHalted | CoreError::SessionEnded(_) => debug!("Tick dropped: {}", e),
        CoreError::MalformedTick(_) | CoreError::OutOfOrderTick { .. } => warn!("Tick dropped: {}", e),
        CoreError::BaselineUnavailable(_) => {
            error!("{}", e);
            let config = engine.config();
            notifications.push(Notification::new(
                notify::error_message(&e.to_string(), config.timezone, Utc::now()),
                Priority::High,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::{Phase, SessionConfig};
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;

    fn line(h: u32, m: u32, s: u32, price: f64) -> String {
        let ms = Kolkata.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap().timestamp_millis();
        format!("{{\"ltp\": {}, \"last_trade_time\": {}}}\n", price, ms)
    }

    #[tokio::test]
    async fn test_live_feed_drives_engine() {
        let mut input = String::new();
        for (h, m, s, p) in [
            (9, 15, 0, 17350.0),
            (9, 18, 0, 17400.0),
            (9, 22, 0, 17300.0),
            (9, 30, 0, 17360.0),
        ] {
            input.push_str(&line(h, m, s, p));
        }
        input.push_str("not json\n");
        input.push_str("{\"ltp\": -1, \"last_trade_time\": 1709524500000}\n");

        let engine = SignalEngine::new(SessionConfig::default());
        let state = Arc::new(AppState::new(engine.status()));
        let (queue, mut rx) = NotificationQueue::channel();

        let engine = run_live_feed(
            engine,
            std::io::Cursor::new(input.into_bytes()),
            state.clone(),
            queue,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        assert_eq!(engine.state().phase, Phase::MonitoringBreakout);

        let status = state.status.read().await.clone();
        assert_eq!(status.phase, Phase::MonitoringBreakout);
        assert_eq!(status.ticks_processed, 4);
        assert_eq!(status.ticks_dropped, 1);

        let first = rx.recv().await.unwrap();
        assert!(first.text.contains("Opening range"));
    }

    #[tokio::test]
    async fn test_session_close_event() {
        let engine = SignalEngine::new(SessionConfig::default());
        let state = Arc::new(AppState::new(engine.status()));
        let (queue, mut notes) = NotificationQueue::channel();
        let (tx, rx) = mpsc::channel(16);

        let close = Kolkata.with_ymd_and_hms(2024, 3, 4, 15, 30, 0).unwrap().with_timezone(&Utc);
        let raw: RawTick = serde_json::from_str(&line(9, 15, 0, 17350.0)).unwrap();
        tx.send(EngineEvent::Tick(raw)).await.unwrap();
        tx.send(EngineEvent::SessionClose(close)).await.unwrap();
        drop(tx);

        let mut engine = run_engine(engine, rx, state, queue).await;
        assert!(engine.end_session(close).is_empty());

        let mut texts = Vec::new();
        while let Some(note) = notes.recv().await {
            texts.push(note.text);
        }
        // The lone opening tick still forms a range once its bucket is flushed
        assert!(texts[0].contains("Opening range"));
        assert!(texts.last().unwrap().contains("Session closed"));
    }

    #[tokio::test]
    async fn test_close_for_other_day_ignored() {
        let engine = SignalEngine::new(SessionConfig::default());
        let state = Arc::new(AppState::new(engine.status()));
        let (queue, _notes) = NotificationQueue::channel();
        let (tx, rx) = mpsc::channel(16);

        let other_close = Kolkata.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap().with_timezone(&Utc);
        tx.send(EngineEvent::Tick(serde_json::from_str(&line(9, 15, 0, 17350.0)).unwrap())).await.unwrap();
        tx.send(EngineEvent::SessionClose(other_close)).await.unwrap();
        tx.send(EngineEvent::Tick(serde_json::from_str(&line(9, 16, 0, 17360.0)).unwrap())).await.unwrap();
        drop(tx);

        let engine = run_engine(engine, rx, state, queue).await;
        assert_eq!(engine.status().ticks_processed, 2);
        assert_eq!(engine.status().ticks_dropped, 0);
    }

    #[test]
    fn test_monitoring_only_while_feed_active() {
        let now = Kolkata.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap().with_timezone(&Utc);
        let mut status = SignalEngine::new(SessionConfig::default()).status();

        // No tick yet
        assert!(monitoring_notification(&status, Kolkata, now, chrono::Duration::minutes(15)).is_none());

        status.last_tick_at = Some(now - chrono::Duration::seconds(FEED_ACTIVE_WINDOW_SECS + 1));
        assert!(monitoring_notification(&status, Kolkata, now, chrono::Duration::minutes(15)).is_none());

        status.last_tick_at = Some(now - chrono::Duration::seconds(5));
        status.last_price = Some(17400.0);
        let note = monitoring_notification(&status, Kolkata, now, chrono::Duration::minutes(15)).unwrap();
        assert_eq!(note.priority, Priority::Normal);
        assert!(note.text.contains("MONITORING"));
        assert!(note.text.contains("17400.00"));
    }

    #[tokio::test]
    async fn test_monitor_task_reports_active_feed() {
        let mut status = SignalEngine::new(SessionConfig::default()).status();
        status.last_tick_at = Some(Utc::now());
        status.ticks_processed = 12;
        let state = Arc::new(AppState::new(status));
        let (queue, mut notes) = NotificationQueue::channel();

        let monitor = tokio::spawn(monitor_status(state, queue, Kolkata, Duration::from_millis(20)));
        let note = notes.recv().await.unwrap();
        monitor.abort();

        assert_eq!(note.priority, Priority::Normal);
        assert!(note.text.contains("*Ticks:* 12"));
    }
}
