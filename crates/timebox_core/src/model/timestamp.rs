//! Epoch-millisecond timestamps and their ISO-8601 transit form.
//!
//! Domain and storage keep `i64` Unix epoch milliseconds. Serialized payloads
//! (trash snapshots, DTOs) carry RFC 3339 strings instead.

use chrono::{DateTime, SecondsFormat, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Unix epoch milliseconds.
pub type EpochMs = i64;

/// Timestamp conversion failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// Input is not a valid RFC 3339 / ISO-8601 timestamp.
    InvalidFormat(String),
    /// Epoch value cannot be represented as a calendar date.
    OutOfRange(EpochMs),
}

impl Display for TimestampError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFormat(value) => write!(f, "invalid ISO-8601 timestamp `{value}`"),
            Self::OutOfRange(value) => write!(f, "epoch milliseconds out of range: {value}"),
        }
    }
}

impl Error for TimestampError {}

/// Formats epoch milliseconds as an RFC 3339 UTC string with millisecond precision.
pub fn to_iso8601(epoch_ms: EpochMs) -> Result<String, TimestampError> {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|value| value.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or(TimestampError::OutOfRange(epoch_ms))
}

/// Parses an ISO-8601 timestamp into epoch milliseconds.
///
/// A trailing `Z` and explicit offsets are both accepted.
pub fn parse_iso8601(value: &str) -> Result<EpochMs, TimestampError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| TimestampError::InvalidFormat(value.to_string()))
}

/// Serde adapter: `EpochMs` <-> ISO-8601 string.
pub mod iso8601 {
    use super::{parse_iso8601, to_iso8601, EpochMs};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &EpochMs, serializer: S) -> Result<S::Ok, S::Error> {
        let text = to_iso8601(*value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EpochMs, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_iso8601(&text).map_err(de::Error::custom)
    }
}

/// Serde adapter: `Option<EpochMs>` <-> nullable ISO-8601 string.
pub mod iso8601_option {
    use super::{parse_iso8601, to_iso8601, EpochMs};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<EpochMs>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(epoch_ms) => {
                let text = to_iso8601(*epoch_ms).map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&text)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<EpochMs>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| parse_iso8601(&text).map_err(de::Error::custom))
            .transpose()
    }
}
