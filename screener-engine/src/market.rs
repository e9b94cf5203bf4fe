//! Core market data types shared across the engine.
//!
//! These mirror the upstream REST/WebSocket payload shapes where serde
//! attributes are present; everything else is the engine's normalised model.

use crate::{de, error::ParseTimeframeError};
use chrono::{DateTime, Duration, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::str::FromStr;

/// Bar sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Nominal duration of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(ParseTimeframeError(other.to_string())),
        }
    }
}

/// One OHLCV interval record for an instrument/timeframe.
///
/// Instrument and timeframe identify the buffer a bar lives in and travel
/// alongside it in [`BarUpdate`] events rather than inside the bar itself.
#[derive(Debug, Clone, Copy, PartialEq, Constructor, Deserialize, Serialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume traded in the base asset.
    pub base_volume: f64,
    /// Volume traded in the quote asset.
    pub quote_volume: f64,
    pub trade_count: Option<u64>,
    /// False while the interval is still open and the bar may be replaced.
    pub is_final: bool,
}

/// A parsed bar event routed through the engine: which buffer, which bar.
#[derive(Debug, Clone, PartialEq)]
pub struct BarUpdate {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    pub bar: Bar,
}

/// Instrument trading status as reported by the universe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentStatus {
    Trading,
    Halted,
    Delisted,
    #[serde(other)]
    Unknown,
}

/// A tradable instrument. Immutable once loaded for a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: SmolStr,
    pub base_asset: SmolStr,
    pub quote_asset: SmolStr,
    pub status: InstrumentStatus,
}

impl InstrumentInfo {
    /// Whether the instrument belongs in the active universe.
    pub fn is_tradable(&self) -> bool {
        self.status == InstrumentStatus::Trading
    }
}

/// Coarse 24-hour summary for one instrument.
///
/// Sources the 24h metric family - a bounded intraday bar buffer cannot
/// cover a full day.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Summary24h {
    pub symbol: SmolStr,
    #[serde(rename = "lastPrice", deserialize_with = "de::de_str")]
    pub last_price: f64,
    #[serde(rename = "highPrice", deserialize_with = "de::de_str")]
    pub high: f64,
    #[serde(rename = "lowPrice", deserialize_with = "de::de_str")]
    pub low: f64,
    #[serde(rename = "volume", deserialize_with = "de::de_str")]
    pub base_volume: f64,
    #[serde(rename = "quoteVolume", deserialize_with = "de::de_str")]
    pub quote_volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_round_trip() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(tf.as_str().parse::<Timeframe>(), Ok(tf));
        }
        assert!("3w".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_serde_uses_wire_form() {
        assert_eq!(serde_json::to_string(&Timeframe::M15).unwrap(), r#""15m""#);
        assert_eq!(
            serde_json::from_str::<Timeframe>(r#""4h""#).unwrap(),
            Timeframe::H4
        );
    }

    #[test]
    fn test_instrument_info_deserialise() {
        let info: InstrumentInfo = serde_json::from_str(
            r#"{"symbol": "BTCUSDT", "baseAsset": "BTC", "quoteAsset": "USDT", "status": "TRADING"}"#,
        )
        .expect("valid instrument");
        assert_eq!(info.symbol, "BTCUSDT");
        assert!(info.is_tradable());

        let halted: InstrumentInfo = serde_json::from_str(
            r#"{"symbol": "XYZUSDT", "baseAsset": "XYZ", "quoteAsset": "USDT", "status": "AUCTION_MATCH"}"#,
        )
        .expect("unknown status maps to Unknown");
        assert_eq!(halted.status, InstrumentStatus::Unknown);
        assert!(!halted.is_tradable());
    }

    #[test]
    fn test_summary_deserialise_string_numbers() {
        let summary: Summary24h = serde_json::from_str(
            r#"{
                "symbol": "BTCUSDT",
                "lastPrice": "43250.10",
                "highPrice": "44000.00",
                "lowPrice": "42800.00",
                "volume": "12345.6",
                "quoteVolume": "534000000.0"
            }"#,
        )
        .expect("valid summary");
        assert_eq!(summary.last_price, 43250.10);
        assert_eq!(summary.quote_volume, 534_000_000.0);
    }
}
