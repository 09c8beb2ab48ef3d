//! Outbound notifications
//!
//! The engine task never awaits delivery: messages go onto an unbounded
//! queue drained by a worker that sends high priority first and keeps a
//! minimum spacing between messages. Delivery failures are logged and
//! never reach strategy state.

mod telegram;

pub use telegram::TelegramNotifier;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::trading_core::{SessionConfig, SessionOutcome, Signal, StateTransition, StatusSnapshot};

/// Default minimum gap between two outbound messages
pub const DEFAULT_SPACING: Duration = Duration::from_secs(1);

/// Delivery order; earlier variants go first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub text: String,
    pub priority: Priority,
}

impl Notification {
    pub fn new(text: impl Into<String>, priority: Priority) -> Self {
        Self {
            text: text.into(),
            priority,
        }
    }
}

/// A destination for notification text
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> Result<()>;
}

/// Writes notifications to the log only, used when no credentials are set
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> Result<()> {
        info!("NOTIFY: {}", text.replace('\n', " | "));
        Ok(())
    }
}

pub fn startup_message(config: &SessionConfig, now: DateTime<Utc>) -> String {
    format!(
        "🚀 *{} BREAKOUT SIGNALS STARTED*\n\n\
         *Time:* {}\n\
         *Strategy:* First {}min range breakout with retest\n\
         *Session:* {} - {}",
        config.symbol,
        now.with_timezone(&config.timezone).format("%H:%M:%S"),
        config.baseline_minutes,
        config.market_open.format("%H:%M"),
        config.market_close.format("%H:%M"),
    )
}

pub fn signal_message(signal: &Signal, timezone: Tz) -> String {
    let mut text = format!(
        "🚀 *SIGNAL: BUY {} {} {}*\n\n\
         *Breakout level:* {:.2}\n\
         *Confirm close:* {:.2}\n\
         *Time:* {}",
        signal.symbol,
        signal.strike,
        signal.direction,
        signal.breakout_level,
        signal.confirm_close,
        signal.confirmed_at.with_timezone(&timezone).format("%H:%M:%S"),
    );
    if let Some(baseline) = signal.baseline {
        text.push_str(&format!("\n*Range:* {:.2} - {:.2}", baseline.low, baseline.high));
    }
    text
}

pub fn error_message(error: &str, timezone: Tz, at: DateTime<Utc>) -> String {
    format!(
        "❌ *ERROR ALERT*\n\n*Error:* {}\n*Time:* {}",
        error,
        at.with_timezone(&timezone).format("%H:%M:%S")
    )
}

/// Periodic health report built from the latest engine snapshot
pub fn monitoring_message(
    status: &StatusSnapshot,
    timezone: Tz,
    now: DateTime<Utc>,
    uptime: chrono::Duration,
) -> String {
    let price = status
        .last_price
        .map_or_else(|| "n/a".to_string(), |p| format!("{:.2}", p));
    let freshness = status
        .last_tick_at
        .map_or_else(|| "never".to_string(), |at| format!("{}s ago", (now - at).num_seconds().max(0)));
    let uptime_secs = uptime.num_seconds().max(1);

    let mut text = format!(
        "📈 *{} MONITORING*\n\n\
         *Time:* {}\n\
         *Price:* {}\n\
         *Last tick:* {}\n\
         *Phase:* {}",
        status.symbol,
        now.with_timezone(&timezone).format("%H:%M:%S"),
        price,
        freshness,
        status.phase,
    );
    if let Some(baseline) = status.baseline {
        text.push_str(&format!("\n*Range:* {:.2} - {:.2}", baseline.low, baseline.high));
    }
    if let (Some(high), Some(low)) = (status.session_high, status.session_low) {
        text.push_str(&format!("\n*Day high/low:* {:.2} / {:.2}", high, low));
    }
    text.push_str(&format!(
        "\n*Ticks:* {} ({:.2}/s)\n*Uptime:* {}h {}m",
        status.ticks_processed,
        status.ticks_processed as f64 / uptime_secs as f64,
        uptime_secs / 3600,
        (uptime_secs % 3600) / 60,
    ));
    text
}

/// Notification worth sending for a state transition, if any
pub fn for_transition(transition: &StateTransition, timezone: Tz) -> Option<Notification> {
    match transition {
        StateTransition::BaselineCaptured(levels) => Some(Notification::new(
            format!(
                "📊 *Opening range set* ({:?})\n*High:* {:.2}\n*Low:* {:.2}",
                levels.source, levels.high, levels.low
            ),
            Priority::Normal,
        )),
        StateTransition::BreakoutDetected { direction, level, close, at } => Some(Notification::new(
            format!(
                "⚡ *{} BREAKOUT* of {:.2}\n*5m close:* {:.2}\n*Time:* {}\nWaiting for retest",
                direction,
                level,
                close,
                at.with_timezone(&timezone).format("%H:%M")
            ),
            Priority::Normal,
        )),
        StateTransition::RetestTouched { .. } => None,
        StateTransition::SignalEmitted(signal) => {
            Some(Notification::new(signal_message(signal, timezone), Priority::High))
        }
        StateTransition::SessionEnded { outcome } => {
            let summary = match outcome {
                SessionOutcome::SignalEmitted => "signal delivered",
                SessionOutcome::RetestPending => "breakout never confirmed",
                SessionOutcome::NoBreakout => "no breakout today",
                SessionOutcome::AwaitingBaseline => "opening range never completed",
                SessionOutcome::BaselineUnavailable => "baseline unavailable",
            };
            Some(Notification::new(format!("🏁 *Session closed:* {}", summary), Priority::Normal))
        }
    }
}

/// Sending half of the notification queue
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification worker gone, message dropped");
        }
    }
}

/// Start a worker task delivering through `notifier`
pub fn spawn_worker(
    notifier: Arc<dyn Notifier>,
    spacing: Duration,
) -> (NotificationQueue, JoinHandle<()>) {
    let (queue, rx) = NotificationQueue::channel();
    let handle = tokio::spawn(run_worker(rx, notifier, spacing));
    (queue, handle)
}

/// Drain the queue until every sender is dropped
pub async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    notifier: Arc<dyn Notifier>,
    spacing: Duration,
) {
    let mut pending: Vec<Notification> = Vec::new();

    loop {
        while let Ok(n) = rx.try_recv() {
            pending.push(n);
        }

        if pending.is_empty() {
            match rx.recv().await {
                Some(n) => {
                    pending.push(n);
                    continue;
                }
                None => break,
            }
        }

        let next = next_index(&pending);
        let notification = pending.remove(next);

        if let Err(e) = notifier.send(&notification.text).await {
            warn!("{} notification failed: {:#}", notifier.name(), e);
        }

        tokio::time::sleep(spacing).await;
    }

    debug!("Notification worker stopped");
}

/// Highest priority first, FIFO within a priority
fn next_index(pending: &[Notification]) -> usize {
    pending
        .iter()
        .enumerate()
        .min_by_key(|(i, n)| (n.priority, *i))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::{BaselineLevels, BaselineSource, OptionType};
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;
    use std::sync::Mutex;
    use std::time::Instant;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Instant)>>,
        fail_first: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn send(&self, text: &str) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            let first = sent.is_empty();
            sent.push((text.to_string(), Instant::now()));
            if self.fail_first && first {
                anyhow::bail!("simulated outage");
            }
            Ok(())
        }
    }

    fn sample_signal() -> Signal {
        Signal {
            id: Uuid::nil(),
            symbol: "NIFTY".to_string(),
            direction: OptionType::CE,
            strike: 17400,
            breakout_level: 17400.0,
            confirmed_at: Kolkata.with_ymd_and_hms(2024, 3, 4, 10, 7, 0).unwrap().with_timezone(&Utc),
            confirm_close: 17410.0,
            baseline: Some(BaselineLevels { high: 17400.0, low: 17300.0, source: BaselineSource::Live }),
        }
    }

    #[test]
    fn test_signal_message() {
        let text = signal_message(&sample_signal(), Kolkata);
        assert!(text.contains("BUY NIFTY 17400 CE"));
        assert!(text.contains("10:07:00"));
        assert!(text.contains("17300.00 - 17400.00"));
    }

    #[test]
    fn test_monitoring_message() {
        let now = Kolkata.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap().with_timezone(&Utc);
        let mut status = crate::trading_core::SignalEngine::new(SessionConfig::default()).status();
        status.last_price = Some(17412.5);
        status.last_tick_at = Some(now - chrono::Duration::seconds(3));
        status.session_high = Some(17450.0);
        status.session_low = Some(17280.0);
        status.baseline = Some(BaselineLevels { high: 17400.0, low: 17300.0, source: BaselineSource::Live });
        status.ticks_processed = 7200;

        let text = monitoring_message(&status, Kolkata, now, chrono::Duration::hours(2));
        assert!(text.contains("NIFTY MONITORING"));
        assert!(text.contains("*Price:* 17412.50"));
        assert!(text.contains("3s ago"));
        assert!(text.contains("17300.00 - 17400.00"));
        assert!(text.contains("17450.00 / 17280.00"));
        assert!(text.contains("7200 (1.00/s)"));
        assert!(text.contains("2h 0m"));
    }

    #[test]
    fn test_transition_priorities() {
        let signal = for_transition(&StateTransition::SignalEmitted(sample_signal()), Kolkata).unwrap();
        assert_eq!(signal.priority, Priority::High);

        let touched = StateTransition::RetestTouched {
            level: 17400.0,
            candle_start: Utc::now(),
        };
        assert!(for_transition(&touched, Kolkata).is_none());

        let ended = StateTransition::SessionEnded { outcome: SessionOutcome::NoBreakout };
        assert!(for_transition(&ended, Kolkata).unwrap().text.contains("no breakout"));
    }

    #[tokio::test]
    async fn test_worker_sends_high_priority_first() {
        let recorder = Arc::new(Recorder::default());
        let (queue, rx) = NotificationQueue::channel();

        queue.push(Notification::new("normal-1", Priority::Normal));
        queue.push(Notification::new("low", Priority::Low));
        queue.push(Notification::new("high", Priority::High));
        queue.push(Notification::new("normal-2", Priority::Normal));
        drop(queue);

        run_worker(rx, recorder.clone(), Duration::from_millis(1)).await;

        let order: Vec<String> = recorder.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(order, vec!["high", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn test_worker_respects_spacing_and_survives_failures() {
        let recorder = Arc::new(Recorder { fail_first: true, ..Default::default() });
        let spacing = Duration::from_millis(40);
        let (queue, rx) = NotificationQueue::channel();

        for i in 0..3 {
            queue.push(Notification::new(format!("msg-{}", i), Priority::Normal));
        }
        drop(queue);

        run_worker(rx, recorder.clone(), spacing).await;

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= spacing);
        }
    }
}
