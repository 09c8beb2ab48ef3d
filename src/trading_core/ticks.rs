//! Tick types and feed normalization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionConfig;
use crate::error::CoreError;

/// Canonical last-traded-price update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Tick {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }

    /// Reject prices that cannot be a traded index value
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(CoreError::MalformedTick(format!("invalid price {}", self.price)));
        }
        Ok(())
    }
}

/// Index-value message as delivered by the live feed.
///
/// Both fields are optional on the wire; a message missing either one
/// is malformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTick {
    /// Last traded price
    #[serde(default, alias = "value")]
    pub ltp: Option<f64>,
    /// Exchange timestamp in epoch milliseconds
    #[serde(default, alias = "tsInMillis")]
    pub last_trade_time: Option<i64>,
}

/// Convert a raw feed message into a `Tick`, dropping malformed and
/// out-of-hours data before it can reach the aggregator.
pub fn normalize(raw: &RawTick, config: &SessionConfig) -> Result<Tick, CoreError> {
    let price = raw
        .ltp
        .ok_or_else(|| CoreError::MalformedTick("missing ltp".to_string()))?;
    let millis = raw
        .last_trade_time
        .ok_or_else(|| CoreError::MalformedTick("missing last_trade_time".to_string()))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| CoreError::MalformedTick(format!("timestamp {} out of range", millis)))?;

    let tick = Tick::new(timestamp, price);
    tick.validate()?;

    if !config.is_market_hours(tick.timestamp) {
        return Err(CoreError::OutsideSession(tick.timestamp));
    }

    Ok(tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn millis_ist(h: u32, m: u32) -> i64 {
        chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2024, 3, 4, h, m, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_normalize_valid_message() {
        let config = SessionConfig::default();
        let raw: RawTick =
            serde_json::from_str(&format!(r#"{{"ltp": 17410.5, "last_trade_time": {}}}"#, millis_ist(10, 0)))
                .unwrap();

        let tick = normalize(&raw, &config).unwrap();
        assert_eq!(tick.price, 17410.5);
        assert_eq!(tick.timestamp.timestamp_millis(), millis_ist(10, 0));
    }

    #[test]
    fn test_normalize_accepts_index_value_field_names() {
        let config = SessionConfig::default();
        let raw: RawTick =
            serde_json::from_str(&format!(r#"{{"value": 17400.0, "tsInMillis": {}}}"#, millis_ist(11, 0)))
                .unwrap();
        assert!(normalize(&raw, &config).is_ok());
    }

    #[test]
    fn test_normalize_rejects_malformed() {
        let config = SessionConfig::default();

        let missing_price = RawTick { ltp: None, last_trade_time: Some(millis_ist(10, 0)) };
        assert!(matches!(normalize(&missing_price, &config), Err(CoreError::MalformedTick(_))));

        let missing_ts = RawTick { ltp: Some(17400.0), last_trade_time: None };
        assert!(matches!(normalize(&missing_ts, &config), Err(CoreError::MalformedTick(_))));

        let negative = RawTick { ltp: Some(-5.0), last_trade_time: Some(millis_ist(10, 0)) };
        assert!(matches!(normalize(&negative, &config), Err(CoreError::MalformedTick(_))));

        let nan = RawTick { ltp: Some(f64::NAN), last_trade_time: Some(millis_ist(10, 0)) };
        assert!(matches!(normalize(&nan, &config), Err(CoreError::MalformedTick(_))));
    }

    #[test]
    fn test_normalize_drops_out_of_hours() {
        let config = SessionConfig::default();
        let early = RawTick { ltp: Some(17400.0), last_trade_time: Some(millis_ist(9, 0)) };
        assert!(matches!(normalize(&early, &config), Err(CoreError::OutsideSession(_))));

        let late = RawTick { ltp: Some(17400.0), last_trade_time: Some(millis_ist(15, 45)) };
        assert!(matches!(normalize(&late, &config), Err(CoreError::OutsideSession(_))));
    }
}
