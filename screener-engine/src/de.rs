//! Deserialisation helpers for upstream payloads that encode numbers as
//! JSON strings and timestamps as millisecond epochs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, de};
use std::{fmt::Display, str::FromStr};

/// Deserialise a type implementing [`FromStr`] from a JSON string.
///
/// Upstream REST and WebSocket payloads encode prices and volumes as strings
/// (e.g. `"price": "16578.50"`), so numeric fields use
/// `#[serde(deserialize_with = "crate::de::de_str")]`.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let value = String::deserialize(deserializer)?;
    value.parse::<T>().map_err(de::Error::custom)
}

/// Deserialise a millisecond epoch integer into a [`DateTime<Utc>`].
pub fn de_u64_epoch_ms_as_datetime_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = i64::deserialize(deserializer)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| de::Error::custom(format!("invalid epoch ms timestamp: {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(deserialize_with = "de_str")]
        price: f64,
        #[serde(deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
        time: DateTime<Utc>,
    }

    #[test]
    fn test_de_str_and_epoch_ms() {
        let row: Row = serde_json::from_str(r#"{"price": "16578.50", "time": 1672304486865}"#)
            .expect("valid row");
        assert_eq!(row.price, 16578.50);
        assert_eq!(row.time.timestamp_millis(), 1672304486865);
    }

    #[test]
    fn test_de_str_rejects_garbage() {
        let result = serde_json::from_str::<Row>(r#"{"price": "not-a-number", "time": 0}"#);
        assert!(result.is_err());
    }
}
