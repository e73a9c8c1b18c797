//! Canonical Trade Record
//!
//! The normalized shape every trade source is converted into before
//! publishing. Records are immutable once built and are consumed exactly once
//! by the publish step.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "pair": "BTC/USD",
//!   "price": 50000.0,
//!   "volume": 0.1,
//!   "timestamp": "2023-09-25T07:49:37.708706",
//!   "timestamp_ms": 1695628177708
//! }
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Timestamp layout used on the wire: microsecond precision, no zone suffix.
const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Naive layout accepted when a source omits the zone suffix.
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while normalizing raw source output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradeError {
    /// Pair identifier was empty or blank.
    #[error("pair identifier cannot be empty")]
    EmptyPair,

    /// Timestamp could not be parsed into a valid instant.
    #[error("invalid trade timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialized milliseconds disagree with the serialized timestamp.
    #[error("timestamp_ms {actual} does not match timestamp ({expected})")]
    MillisMismatch {
        /// Milliseconds derived from the timestamp.
        expected: i64,
        /// Milliseconds carried by the record.
        actual: i64,
    },

    /// Price or volume was negative.
    #[error("{field} cannot be negative: {value}")]
    NegativeValue {
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },
}

// =============================================================================
// Pair
// =============================================================================

/// Trading pair identifier, e.g. `BTC/USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair(String);

impl Pair {
    /// Create a pair from a non-blank identifier.
    ///
    /// # Errors
    ///
    /// Returns `TradeError::EmptyPair` if the identifier is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, TradeError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(TradeError::EmptyPair);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bus-safe message key.
    ///
    /// Every character outside `[A-Za-z0-9._-]` becomes `-`, so `BTC/USD`
    /// maps to `BTC-USD`.
    #[must_use]
    pub fn bus_key(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Pair {
    type Error = TradeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.0
    }
}

// =============================================================================
// Raw Trade
// =============================================================================

/// Un-normalized trade fields as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTrade {
    /// Pair identifier.
    pub pair: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub volume: Decimal,
    /// Source timestamp string.
    pub timestamp: String,
}

// =============================================================================
// Canonical Trade
// =============================================================================

/// Normalized trade record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TradeWire")]
pub struct CanonicalTrade {
    pair: Pair,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    volume: Decimal,
    #[serde(rename = "timestamp", with = "wire_timestamp")]
    event_time: DateTime<Utc>,
    #[serde(rename = "timestamp_ms")]
    event_time_millis: i64,
}

impl CanonicalTrade {
    /// Build a record from a typed timestamp.
    ///
    /// # Errors
    ///
    /// Returns `TradeError::NegativeValue` if price or volume is negative.
    pub fn new(
        pair: Pair,
        price: Decimal,
        volume: Decimal,
        event_time: DateTime<Utc>,
    ) -> Result<Self, TradeError> {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(TradeError::NegativeValue {
                field: "price",
                value: price,
            });
        }
        if volume.is_sign_negative() && !volume.is_zero() {
            return Err(TradeError::NegativeValue {
                field: "volume",
                value: volume,
            });
        }

        Ok(Self {
            pair,
            price,
            volume,
            event_time,
            event_time_millis: event_time.timestamp_millis(),
        })
    }

    /// Normalize raw source output.
    ///
    /// # Errors
    ///
    /// Fails if the pair is blank, the timestamp cannot be parsed, or price
    /// or volume is negative.
    pub fn from_raw(raw: RawTrade) -> Result<Self, TradeError> {
        let pair = Pair::new(raw.pair)?;
        let event_time = parse_timestamp(&raw.timestamp)?;
        Self::new(pair, raw.price, raw.volume, event_time)
    }

    /// Build a record from fractional epoch seconds.
    ///
    /// # Errors
    ///
    /// Returns `TradeError::InvalidTimestamp` if the instant is out of range.
    pub fn from_epoch_seconds(
        pair: Pair,
        price: Decimal,
        volume: Decimal,
        seconds: Decimal,
    ) -> Result<Self, TradeError> {
        let invalid = || TradeError::InvalidTimestamp(seconds.to_string());

        let whole = seconds.floor();
        let nanos = ((seconds - whole) * Decimal::from(1_000_000_000))
            .trunc()
            .to_u32()
            .ok_or_else(invalid)?;
        let secs = whole.to_i64().ok_or_else(invalid)?;
        let event_time = DateTime::from_timestamp(secs, nanos).ok_or_else(invalid)?;

        Self::new(pair, price, volume, event_time)
    }

    /// Trading pair.
    #[must_use]
    pub const fn pair(&self) -> &Pair {
        &self.pair
    }

    /// Execution price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Executed quantity.
    #[must_use]
    pub const fn volume(&self) -> Decimal {
        self.volume
    }

    /// Event time.
    #[must_use]
    pub const fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    /// Event time in epoch milliseconds, floored.
    #[must_use]
    pub const fn event_time_millis(&self) -> i64 {
        self.event_time_millis
    }
}

/// Deserialization shape; `timestamp_ms` is checked against `timestamp`.
#[derive(Deserialize)]
struct TradeWire {
    pair: Pair,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    volume: Decimal,
    #[serde(with = "wire_timestamp")]
    timestamp: DateTime<Utc>,
    timestamp_ms: i64,
}

impl TryFrom<TradeWire> for CanonicalTrade {
    type Error = TradeError;

    fn try_from(wire: TradeWire) -> Result<Self, Self::Error> {
        let trade = Self::new(wire.pair, wire.price, wire.volume, wire.timestamp)?;
        if trade.event_time_millis != wire.timestamp_ms {
            return Err(TradeError::MillisMismatch {
                expected: trade.event_time_millis,
                actual: wire.timestamp_ms,
            });
        }
        Ok(trade)
    }
}

/// Parse a source timestamp.
///
/// Accepts RFC 3339 (`2023-09-25T07:49:37.708706Z`) and the zone-less form
/// (`2023-09-25T07:49:37.708706`), which is read as UTC.
///
/// # Errors
///
/// Returns `TradeError::InvalidTimestamp` if neither form matches.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TradeError> {
    let trimmed = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, NAIVE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TradeError::InvalidTimestamp(value.to_string()))
}

mod wire_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(super::WIRE_TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
