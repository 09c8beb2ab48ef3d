use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};

use nifty_breakout::api;
use nifty_breakout::backfill::{self, HistoricalClient};
use nifty_breakout::notify::{self, LogNotifier, Notification, Notifier, Priority, TelegramNotifier};
use nifty_breakout::streams::{self, load_ticks_csv};
use nifty_breakout::trading_core::{is_trading_day, HistoricalCandle, SessionConfig, SignalEngine};
use nifty_breakout::types::AppState;

#[derive(Parser, Debug)]
#[command(name = "nifty-breakout")]
#[command(author, version, about = "NIFTY opening-range breakout/retest option signals")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Index symbol the signals refer to
    #[arg(long, global = true, env = "NIFTY_SYMBOL", default_value = "NIFTY")]
    symbol: String,

    /// Option strike spacing in index points
    #[arg(long, global = true, default_value = "50", value_parser = parse_strike_step)]
    strike_step: f64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live session on newline-delimited JSON ticks from stdin
    Live {
        /// Serve GET /api/status on this port
        #[arg(short, long)]
        port: Option<u16>,

        /// Load opening-range candles from CSV instead of the broker API
        #[arg(long)]
        backfill_csv: Option<PathBuf>,

        /// Run even on a weekend
        #[arg(long)]
        force: bool,

        /// Minimum gap between notifications in milliseconds
        #[arg(long, default_value_t = notify::DEFAULT_SPACING.as_millis() as u64)]
        notify_spacing_ms: u64,

        /// How often the market-close watchdog checks the clock, in seconds
        #[arg(long, default_value = "15")]
        watchdog_secs: u64,

        /// Interval between monitoring reports, in seconds
        #[arg(long, default_value = "900", value_parser = clap::value_parser!(u64).range(1..))]
        monitor_secs: u64,
    },

    /// Replay a CSV of ticks (timestamp,price) through a fresh engine
    Replay {
        /// Tick file
        #[arg(short, long)]
        ticks: PathBuf,

        /// Opening-range candles for a late-start replay
        #[arg(long)]
        backfill_csv: Option<PathBuf>,
    },
}

fn parse_strike_step(s: &str) -> Result<f64, String> {
    let step: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if !step.is_finite() || step <= 0.0 {
        return Err(format!("strike step must be a positive number, got {}", s));
    }
    Ok(step)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nifty_breakout=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = SessionConfig {
        symbol: args.symbol.clone(),
        strike_step: args.strike_step,
        ..SessionConfig::default()
    };

    match args.command {
        Commands::Live {
            port,
            backfill_csv,
            force,
            notify_spacing_ms,
            watchdog_secs,
            monitor_secs,
        } => {
            run_live(
                config,
                port,
                backfill_csv,
                force,
                Duration::from_millis(notify_spacing_ms),
                Duration::from_secs(watchdog_secs),
                Duration::from_secs(monitor_secs),
            )
            .await
        }
        Commands::Replay { ticks, backfill_csv } => run_replay(config, ticks, backfill_csv),
    }
}

async fn run_live(
    config: SessionConfig,
    port: Option<u16>,
    backfill_csv: Option<PathBuf>,
    force: bool,
    spacing: Duration,
    watchdog_period: Duration,
    monitor_period: Duration,
) -> Result<()> {
    let now = Utc::now();
    let today = config.local_date(now);

    info!("Starting {} breakout signal service", config.symbol);
    info!(
        "Session: {} - {} {} | baseline {}m | strike step {}",
        config.market_open, config.market_close, config.timezone, config.baseline_minutes, config.strike_step
    );

    if !is_trading_day(today) && !force {
        warn!("{} is not a trading day, exiting (use --force to override)", today);
        return Ok(());
    }

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_env() {
        Ok(telegram) => {
            info!("Telegram notifications enabled");
            Arc::new(telegram)
        }
        Err(e) => {
            info!("Telegram not configured ({}), notifications go to the log", e);
            Arc::new(LogNotifier)
        }
    };
    let (queue, worker) = notify::spawn_worker(notifier, spacing);
    queue.push(Notification::new(notify::startup_message(&config, now), Priority::High));

    let mut engine = SignalEngine::new(config.clone());
    engine.begin_session(today);

    if config.is_after_baseline_window(now) {
        info!("Started after the opening range, backfilling baseline");
        match load_backfill(&config, today, backfill_csv).await {
            Ok(candles) => match engine.seed_baseline(today, &candles) {
                Ok(transitions) => {
                    for t in &transitions {
                        if let Some(n) = notify::for_transition(t, config.timezone) {
                            queue.push(n);
                        }
                    }
                }
                Err(e) => warn!("Backfill did not produce a baseline: {}", e),
            },
            Err(e) => warn!("Backfill failed: {:#}", e),
        }
    }

    let state = Arc::new(AppState::new(engine.status()));

    if let Some(port) = port {
        let api_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, api_state).await {
                error!("Status server error: {:#}", e);
            }
        });
    }

    info!("Reading ticks from stdin");
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    let mut engine = streams::run_live_feed(
        engine,
        reader,
        state.clone(),
        queue.clone(),
        watchdog_period,
        monitor_period,
    )
    .await?;

    // Feed gone before the watchdog fired: close out with what has elapsed
    if let Some(date) = engine.session_date() {
        let at = Utc::now().min(config.session_close(date));
        for t in engine.end_session(at) {
            if let Some(n) = notify::for_transition(&t, config.timezone) {
                queue.push(n);
            }
        }
    }
    *state.status.write().await = engine.status();

    drop(queue);
    worker.await.context("Notification worker panicked")?;
    Ok(())
}

async fn load_backfill(
    config: &SessionConfig,
    date: chrono::NaiveDate,
    csv: Option<PathBuf>,
) -> Result<Vec<HistoricalCandle>> {
    match csv {
        Some(path) => backfill::load_candles_csv(&path),
        None => {
            let client = HistoricalClient::from_env()?;
            client.fetch_opening_range(config, date).await
        }
    }
}

fn run_replay(config: SessionConfig, ticks: PathBuf, backfill_csv: Option<PathBuf>) -> Result<()> {
    let ticks = load_ticks_csv(&ticks)?;
    let backfill = backfill_csv
        .map(|path| backfill::load_candles_csv(&path))
        .transpose()?;

    let mut engine = SignalEngine::new(config);
    let reports = streams::run_replay(&mut engine, &ticks, backfill.as_deref())?;

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
