//! Wire protocol for the multiplexed streaming endpoint.
//!
//! Client sends SUBSCRIBE/UNSUBSCRIBE control frames keyed by stream name;
//! the server pushes bar-update events with string-encoded numbers.

use crate::{
    de,
    market::{Bar, BarUpdate, Timeframe},
    subscription::StreamKey,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Control frame method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Method {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe,
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe,
}

/// Outbound subscription control frame:
/// `{"method": "SUBSCRIBE", "params": ["btcusdt@bar_1m"], "id": 1}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ControlFrame {
    pub method: Method,
    pub params: Vec<String>,
    pub id: u64,
}

impl ControlFrame {
    pub fn new(method: Method, keys: &[StreamKey], id: u64) -> Self {
        Self {
            method,
            params: keys.iter().map(StreamKey::stream_name).collect(),
            id,
        }
    }
}

/// Bar payload inside a push event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WireBar {
    #[serde(
        rename = "startTime",
        deserialize_with = "de::de_u64_epoch_ms_as_datetime_utc"
    )]
    pub start_time: DateTime<Utc>,
    #[serde(
        rename = "closeTime",
        deserialize_with = "de::de_u64_epoch_ms_as_datetime_utc"
    )]
    pub close_time: DateTime<Utc>,
    pub interval: Timeframe,
    #[serde(deserialize_with = "de::de_str")]
    pub open: f64,
    #[serde(deserialize_with = "de::de_str")]
    pub high: f64,
    #[serde(deserialize_with = "de::de_str")]
    pub low: f64,
    #[serde(deserialize_with = "de::de_str")]
    pub close: f64,
    #[serde(deserialize_with = "de::de_str")]
    pub volume: f64,
    #[serde(rename = "quoteVolume", deserialize_with = "de::de_str")]
    pub quote_volume: f64,
    #[serde(rename = "tradeCount", default)]
    pub trade_count: Option<u64>,
    #[serde(rename = "isClosed")]
    pub is_closed: bool,
}

/// Server push event carrying one bar update.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BarEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(
        rename = "eventTime",
        deserialize_with = "de::de_u64_epoch_ms_as_datetime_utc"
    )]
    pub event_time: DateTime<Utc>,
    pub instrument: String,
    pub bar: WireBar,
}

impl BarEvent {
    /// Normalise into the engine's internal update shape.
    pub fn into_update(self) -> BarUpdate {
        let bar = Bar {
            open_time: self.bar.start_time,
            close_time: self.bar.close_time,
            open: self.bar.open,
            high: self.bar.high,
            low: self.bar.low,
            close: self.bar.close,
            base_volume: self.bar.volume,
            quote_volume: self.bar.quote_volume,
            trade_count: self.bar.trade_count,
            is_final: self.bar.is_closed,
        };
        BarUpdate {
            symbol: SmolStr::new(self.instrument.to_uppercase()),
            timeframe: self.bar.interval,
            bar,
        }
    }
}

/// Subscription acknowledgement: `{"result": null, "id": 1}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AckFrame {
    #[serde(default)]
    pub result: Option<Value>,
    pub id: u64,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Bar(BarEvent),
    Ack(AckFrame),
    /// Parsed JSON without a recognised shape; dropped by the caller.
    Unknown,
}

/// Classify and parse one inbound text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("eventType").is_some() {
        serde_json::from_value(value).map(InboundFrame::Bar)
    } else if value.get("id").is_some() {
        serde_json::from_value(value).map(InboundFrame::Ack)
    } else {
        Ok(InboundFrame::Unknown)
    }
}
