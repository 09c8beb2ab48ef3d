//! Historical candle backfill
//!
//! When the process starts after the opening range has elapsed, the
//! baseline is rebuilt from 1-minute historical candles, either fetched
//! from the broker's range endpoint or loaded from a CSV file.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::trading_core::{HistoricalCandle, Resolution, SessionConfig};

/// Default API base URL for the historical-candle endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.groww.in";

/// Authenticated client for the historical candle range endpoint
pub struct HistoricalClient {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CandleRangeResponse {
    payload: Option<CandlePayload>,
}

#[derive(Debug, Deserialize)]
struct CandlePayload {
    #[serde(default)]
    candles: Vec<Vec<serde_json::Value>>,
}

impl HistoricalClient {
    /// Create a new client from environment variables
    ///
    /// Expects:
    /// - `GROWW_ACCESS_TOKEN` - bearer token for the broker API
    /// - `GROWW_BASE_URL` (optional) - API base URL
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("GROWW_ACCESS_TOKEN")
            .context("GROWW_ACCESS_TOKEN environment variable not set")?;
        let base_url =
            std::env::var("GROWW_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Self::new(access_token, base_url)
    }

    pub fn new(access_token: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    /// Fetch 1-minute candles for `[start, end)` in exchange-local time
    pub async fn fetch_minute_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: Tz,
    ) -> Result<Vec<HistoricalCandle>> {
        let fmt = "%Y-%m-%d %H:%M:%S";
        let start_time = start.with_timezone(&timezone).format(fmt).to_string();
        let end_time = end.with_timezone(&timezone).format(fmt).to_string();

        info!("Fetching 1m historical candles for {} ({} -> {})", symbol, start_time, end_time);

        let response = self
            .client
            .get(format!("{}/v1/historical/candle/range", self.base_url))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .header("X-API-VERSION", "1.0")
            .query(&[
                ("exchange", "NSE"),
                ("segment", "CASH"),
                ("trading_symbol", symbol),
                ("start_time", start_time.as_str()),
                ("end_time", end_time.as_str()),
                ("interval_in_minutes", "1"),
            ])
            .send()
            .await
            .context("Failed to send historical candle request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Historical candle request failed with status {}: {}",
                status,
                body
            ));
        }

        let body: CandleRangeResponse = response
            .json()
            .await
            .context("Failed to parse historical candle response")?;

        let rows = body.payload.map(|p| p.candles).unwrap_or_default();
        let candles = parse_candle_rows(&rows)?;
        info!("Received {} historical candles", candles.len());
        Ok(candles)
    }

    /// Fetch the opening-range window of `date` per the session config
    pub async fn fetch_opening_range(
        &self,
        config: &SessionConfig,
        date: NaiveDate,
    ) -> Result<Vec<HistoricalCandle>> {
        self.fetch_minute_candles(
            &config.symbol,
            config.session_open(date),
            config.baseline_end(date),
            config.timezone,
        )
        .await
    }
}

/// Rows are `[epoch_secs, open, high, low, close, volume]`
fn parse_candle_rows(rows: &[Vec<serde_json::Value>]) -> Result<Vec<HistoricalCandle>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let num = |idx: usize| -> Result<f64> {
                row.get(idx)
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| anyhow!("candle row {} has no numeric field {}", i, idx))
            };

            let secs = num(0)? as i64;
            let bucket_start = DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| anyhow!("candle row {} has invalid timestamp {}", i, secs))?;

            Ok(HistoricalCandle {
                resolution: Resolution::OneMinute,
                bucket_start,
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CsvCandleRow {
    bucket_start: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Parse an RFC 3339 timestamp or epoch milliseconds
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| anyhow!("timestamp {} out of range", millis));
    }
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Failed to parse timestamp: {}", raw))?
        .with_timezone(&Utc))
}

/// Read 1-minute candles from CSV with header `bucket_start,open,high,low,close`
pub fn read_candles_csv<R: Read>(reader: R) -> Result<Vec<HistoricalCandle>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut candles = Vec::new();

    for result in csv_reader.deserialize() {
        let row: CsvCandleRow = result.with_context(|| "Failed to parse CSV candle row")?;
        candles.push(HistoricalCandle {
            resolution: Resolution::OneMinute,
            bucket_start: parse_timestamp(&row.bucket_start)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
        });
    }

    debug!("Parsed {} candles from CSV", candles.len());
    Ok(candles)
}

pub fn load_candles_csv(path: &Path) -> Result<Vec<HistoricalCandle>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    read_candles_csv(file)
}
