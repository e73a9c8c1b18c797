//! Trade Source Port (Driven Port)
//!
//! Uniform contract for the live feed, historical batch and synthetic
//! fixture variants.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::domain::trade::{CanonicalTrade, TradeError};

/// Closed set of trade source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Persistent streaming connection.
    Live,
    /// Paginated bulk query over a lookback window.
    Historical,
    /// Deterministic in-memory sequence.
    Synthetic,
}

impl SourceKind {
    /// Identifier used in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Historical => "historical",
            Self::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "historical" => Ok(Self::Historical),
            "synthetic" => Ok(Self::Synthetic),
            _ => Err(ConfigurationError::UnknownSourceKind(s.to_string())),
        }
    }
}

/// Invalid source selection. Fatal at startup, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Source kind is not one of live, historical, synthetic.
    #[error("unknown trade source kind: {0:?}")]
    UnknownSourceKind(String),

    /// Pair list was empty.
    #[error("at least one pair is required")]
    EmptyPairs,

    /// A pair identifier was blank.
    #[error("invalid pair identifier: {0:?}")]
    InvalidPair(String),

    /// Historical source selected without a lookback window.
    #[error("historical source requires a lookback window")]
    MissingLookback,

    /// Lookback window was zero or reaches before the representable range.
    #[error("lookback window must be a positive, representable duration")]
    InvalidLookback,

    /// Source-specific parameter was invalid.
    #[error("invalid {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors from a trade source. Non-recoverable for that source instance.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Upstream connection failed or was lost.
    #[error("source connection error: {0}")]
    Connection(String),

    /// Upstream sent something outside its protocol.
    #[error("source protocol error: {0}")]
    Protocol(String),

    /// Upstream record could not be normalized.
    #[error("malformed trade from source: {0}")]
    Malformed(#[from] TradeError),

    /// HTTP request failed.
    #[error("source HTTP error: {0}")]
    Http(String),

    /// Upstream API reported errors.
    #[error("source API error: {0}")]
    Api(String),
}

/// Port for pulling canonical trades.
///
/// `next_batch` must be cancel-safe: dropping the returned future before it
/// completes must not lose records the source already received.
#[async_trait]
pub trait TradeSource: Send {
    /// Which variant this source is.
    fn kind(&self) -> SourceKind;

    /// Pull the next ordered batch. An empty batch means "no data yet".
    async fn next_batch(&mut self) -> Result<Vec<CanonicalTrade>, SourceError>;

    /// Whether the source is exhausted. Once true, stays true.
    fn is_done(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("live", SourceKind::Live)]
    #[test_case("historical", SourceKind::Historical)]
    #[test_case("synthetic", SourceKind::Synthetic)]
    #[test_case(" Synthetic ", SourceKind::Synthetic)]
    #[test_case("LIVE", SourceKind::Live)]
    fn parses_known_kinds(input: &str, expected: SourceKind) {
        assert_eq!(input.parse::<SourceKind>().unwrap(), expected);
    }

    #[test_case("kraken")]
    #[test_case("")]
    #[test_case("kraken_api.websocket.KrakenWebsocketTradeAPI")]
    fn rejects_unknown_kinds(input: &str) {
        assert_eq!(
            input.parse::<SourceKind>(),
            Err(ConfigurationError::UnknownSourceKind(input.to_string()))
        );
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [SourceKind::Live, SourceKind::Historical, SourceKind::Synthetic] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
    }
}
