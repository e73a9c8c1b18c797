//! Kraken Wire Message Types
//!
//! Request and response shapes for the Kraken v2 websocket trade channel and
//! the REST `/0/public/Trades` endpoint.
//!
//! # Websocket Frames
//!
//! - Method acknowledgements carry `method` and `success`
//! - Channel messages carry `channel` (`trade`, `heartbeat`, `status`)
//!
//! # References
//!
//! - [WebSocket v2 Trade](https://docs.kraken.com/api/docs/websocket-v2/trade)
//! - [REST Recent Trades](https://docs.kraken.com/api/docs/rest-api/get-recent-trades)

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::SourceError;
use crate::domain::trade::{CanonicalTrade, Pair, RawTrade};

// =============================================================================
// Websocket Requests
// =============================================================================

/// Subscribe request for the v2 `trade` channel.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    /// Always `subscribe`.
    pub method: &'static str,
    /// Channel parameters.
    pub params: SubscribeParams,
}

/// Parameters of a subscribe request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeParams {
    /// Always `trade`.
    pub channel: &'static str,
    /// Pairs in `BASE/QUOTE` form.
    pub symbol: Vec<String>,
    /// Whether to replay recent trades on subscribe.
    pub snapshot: bool,
}

impl SubscribeRequest {
    /// Subscribe to live trades for `pairs`, without the snapshot replay.
    #[must_use]
    pub fn trades(pairs: &[Pair]) -> Self {
        Self {
            method: "subscribe",
            params: SubscribeParams {
                channel: "trade",
                symbol: pairs.iter().map(|p| p.as_str().to_string()).collect(),
                snapshot: false,
            },
        }
    }
}

// =============================================================================
// Websocket Responses
// =============================================================================

#[derive(Debug, Deserialize)]
struct MethodAck {
    method: String,
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeUpdate {
    #[serde(default)]
    data: Vec<TradeEntry>,
}

/// One element of a `trade` channel `data` array.
#[derive(Debug, Deserialize)]
struct TradeEntry {
    symbol: String,
    price: Decimal,
    qty: Decimal,
    timestamp: String,
}

/// A decoded websocket frame.
#[derive(Debug)]
pub enum Inbound {
    /// Normalized trades, in message order.
    Trades(Vec<CanonicalTrade>),
    /// The server refused the subscription.
    SubscribeRejected(String),
    /// Heartbeats, status updates and successful acks.
    Ignored,
}

/// Decode one websocket text frame.
///
/// # Errors
///
/// Returns `SourceError::Protocol` for frames that are not JSON objects of a
/// known shape, and `SourceError::Malformed` for trades that fail
/// normalization.
pub fn decode(text: &str) -> Result<Inbound, SourceError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SourceError::Protocol(format!("invalid JSON frame: {e}")))?;

    if value.get("method").is_some() {
        let ack: MethodAck = serde_json::from_value(value)
            .map_err(|e| SourceError::Protocol(format!("invalid method response: {e}")))?;
        if ack.method == "subscribe" && !ack.success {
            return Ok(Inbound::SubscribeRejected(
                ack.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        return Ok(Inbound::Ignored);
    }

    match value.get("channel").and_then(serde_json::Value::as_str) {
        Some("trade") => {
            let update: TradeUpdate = serde_json::from_value(value)
                .map_err(|e| SourceError::Protocol(format!("invalid trade message: {e}")))?;
            let trades = update
                .data
                .into_iter()
                .map(|entry| {
                    CanonicalTrade::from_raw(RawTrade {
                        pair: entry.symbol,
                        price: entry.price,
                        volume: entry.qty,
                        timestamp: entry.timestamp,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Inbound::Trades(trades))
        }
        Some(_) => Ok(Inbound::Ignored),
        None => Err(SourceError::Protocol(format!(
            "unrecognized frame: {}...",
            text.chars().take(50).collect::<String>()
        ))),
    }
}

// =============================================================================
// REST Responses
// =============================================================================

/// Envelope of every Kraken REST response.
#[derive(Debug, Deserialize)]
pub struct RestEnvelope {
    /// Error strings; non-empty means the request failed.
    #[serde(default)]
    pub error: Vec<String>,
    /// Present on success.
    #[serde(default)]
    pub result: Option<TradesResult>,
}

/// `result` of `/0/public/Trades`.
///
/// One key holds the trade rows for the requested pair (Kraken may rename
/// it, e.g. `XXBTZUSD`), and `last` holds the next `since` cursor.
#[derive(Debug, Deserialize)]
pub struct TradesResult {
    /// Next page cursor, nanoseconds since the epoch as a string.
    #[serde(default)]
    pub last: Option<String>,
    #[serde(flatten)]
    rows: HashMap<String, serde_json::Value>,
}

/// One REST trade before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalRow {
    /// Execution price.
    pub price: Decimal,
    /// Executed volume.
    pub volume: Decimal,
    /// Fractional seconds since the epoch.
    pub time: Decimal,
}

impl TradesResult {
    /// Trade rows of the single pair in this response.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Protocol` if the rows are not in the documented
    /// shape.
    pub fn rows(&self) -> Result<Vec<HistoricalRow>, SourceError> {
        let Some(raw) = self.rows.values().find(|v| v.is_array()) else {
            return Ok(Vec::new());
        };

        // [price, volume, time, side, type, misc, trade_id]
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_value(raw.clone())
            .map_err(|e| SourceError::Protocol(format!("invalid trade rows: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(HistoricalRow {
                    price: row_decimal(row, 0, "price")?,
                    volume: row_decimal(row, 1, "volume")?,
                    time: row_decimal(row, 2, "time")?,
                })
            })
            .collect()
    }

    /// Parsed `last` cursor.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Protocol` if `last` is not an integer.
    pub fn last_cursor(&self) -> Result<Option<u64>, SourceError> {
        self.last
            .as_deref()
            .map(|last| {
                last.parse::<u64>()
                    .map_err(|e| SourceError::Protocol(format!("invalid cursor {last:?}: {e}")))
            })
            .transpose()
    }
}

/// Kraken sends price and volume as strings and time as a number.
fn row_decimal(
    row: &[serde_json::Value],
    index: usize,
    field: &str,
) -> Result<Decimal, SourceError> {
    let text = match row.get(index) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        other => {
            return Err(SourceError::Protocol(format!(
                "missing {field} in trade row: {other:?}"
            )));
        }
    };
    text.parse::<Decimal>()
        .map_err(|e| SourceError::Protocol(format!("invalid {field} {text:?}: {e}")))
}

// =============================================================================
// Tests
// =============================================================================
