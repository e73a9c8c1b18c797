//! Trade Source Adapters
//!
//! Concrete `TradeSource` implementations and the selector that builds one
//! from a declarative source kind.
//!
//! # Sources
//!
//! - `live`: Kraken websocket feed, connected on first poll
//! - `historical`: Kraken REST history over a lookback window
//! - `synthetic`: deterministic in-memory sequence
//!
//! Selection validates everything up front and performs no I/O.

pub mod kraken;
mod synthetic;

use std::time::Duration;

use chrono::Utc;

pub use kraken::{HistoricalConfig, KrakenHistoricalSource, KrakenLiveFeed, LiveFeedConfig};
pub use synthetic::SyntheticSource;

use crate::application::ports::{ConfigurationError, SourceKind, TradeSource};
use crate::domain::trade::{CanonicalTrade, Pair};
use crate::infrastructure::config::IngestConfig;

// =============================================================================
// Options
// =============================================================================

/// Synthetic source options.
#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    /// Generated trades per pair.
    pub trades_per_pair: usize,
    /// Records per batch.
    pub batch_size: usize,
    /// RNG seed.
    pub seed: u64,
    /// Explicit records to emit instead of generating them.
    pub fixture: Option<Vec<CanonicalTrade>>,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            trades_per_pair: 100,
            batch_size: 10,
            seed: 42,
            fixture: None,
        }
    }
}

/// Per-variant construction parameters.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Live feed settings.
    pub live: LiveFeedConfig,
    /// Historical source settings.
    pub historical: HistoricalConfig,
    /// Synthetic source settings.
    pub synthetic: SyntheticOptions,
}

impl SourceOptions {
    /// Options derived from service configuration.
    #[must_use]
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            live: LiveFeedConfig {
                url: config.kraken.ws_url.clone(),
                poll_wait: config.kraken.live_poll_wait,
            },
            historical: HistoricalConfig {
                base_url: config.kraken.rest_url.clone(),
                page_size: config.kraken.historical_page_size,
                timeout: config.kraken.http_timeout,
            },
            synthetic: SyntheticOptions {
                trades_per_pair: config.synthetic.trades_per_pair,
                batch_size: config.synthetic.batch_size,
                seed: config.synthetic.seed,
                fixture: None,
            },
        }
    }

    /// Emit `trades` from the synthetic source instead of generating them.
    #[must_use]
    pub fn with_fixture(mut self, trades: Vec<CanonicalTrade>) -> Self {
        self.synthetic.fixture = Some(trades);
        self
    }
}

// =============================================================================
// Source Selector
// =============================================================================

/// Builds a `TradeSource` from a source kind and its parameters.
#[derive(Debug, Clone, Default)]
pub struct SourceSelector {
    options: SourceOptions,
}

impl SourceSelector {
    /// Create a selector.
    #[must_use]
    pub const fn new(options: SourceOptions) -> Self {
        Self { options }
    }

    /// Build a source from its configuration identifier.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the kind is unknown or the parameters
    /// are invalid for it.
    pub fn create(
        &self,
        kind: &str,
        pairs: &[String],
        lookback: Option<Duration>,
    ) -> Result<Box<dyn TradeSource>, ConfigurationError> {
        self.create_kind(kind.parse()?, pairs, lookback)
    }

    /// Build a source of a known kind.
    ///
    /// `lookback` is required and must be positive for `Historical`, and is
    /// ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `pairs` is empty, a pair is blank, or
    /// a parameter the kind needs is missing or invalid.
    pub fn create_kind(
        &self,
        kind: SourceKind,
        pairs: &[String],
        lookback: Option<Duration>,
    ) -> Result<Box<dyn TradeSource>, ConfigurationError> {
        let pairs = validate_pairs(pairs)?;

        if kind != SourceKind::Historical && lookback.is_some() {
            tracing::debug!(source = %kind, "Ignoring lookback for non-historical source");
        }

        let source: Box<dyn TradeSource> = match kind {
            SourceKind::Live => Box::new(KrakenLiveFeed::new(self.options.live.clone(), pairs)),
            SourceKind::Historical => {
                let lookback = lookback.ok_or(ConfigurationError::MissingLookback)?;
                if lookback.is_zero() {
                    return Err(ConfigurationError::InvalidLookback);
                }
                Box::new(KrakenHistoricalSource::new(
                    self.options.historical.clone(),
                    pairs,
                    lookback,
                )?)
            }
            SourceKind::Synthetic => Box::new(self.synthetic(&pairs)?),
        };

        tracing::debug!(source = %kind, "Trade source selected");
        Ok(source)
    }

    fn synthetic(&self, pairs: &[Pair]) -> Result<SyntheticSource, ConfigurationError> {
        let options = &self.options.synthetic;
        if options.batch_size == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "synthetic batch size",
                reason: "must be at least 1".to_string(),
            });
        }

        if let Some(fixture) = &options.fixture {
            let trades = fixture
                .iter()
                .filter(|trade| pairs.contains(trade.pair()))
                .cloned()
                .collect();
            return Ok(SyntheticSource::from_trades(trades, options.batch_size));
        }

        SyntheticSource::generated(
            pairs,
            options.trades_per_pair,
            options.batch_size,
            options.seed,
            Utc::now(),
        )
        .map_err(|e| ConfigurationError::InvalidParameter {
            name: "synthetic fixture",
            reason: e.to_string(),
        })
    }
}

fn validate_pairs(pairs: &[String]) -> Result<Vec<Pair>, ConfigurationError> {
    if pairs.is_empty() {
        return Err(ConfigurationError::EmptyPairs);
    }
    pairs
        .iter()
        .map(|raw| Pair::new(raw.as_str()).map_err(|_| ConfigurationError::InvalidPair(raw.clone())))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn pairs(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test_case("live", None, SourceKind::Live)]
    #[test_case("live", Some(DAY), SourceKind::Live; "live ignores lookback")]
    #[test_case("historical", Some(DAY), SourceKind::Historical)]
    #[test_case("synthetic", None, SourceKind::Synthetic)]
    #[test_case("SYNTHETIC", Some(DAY), SourceKind::Synthetic; "synthetic ignores lookback")]
    fn valid_combinations(kind: &str, lookback: Option<Duration>, expected: SourceKind) {
        let selector = SourceSelector::default();
        let source = selector
            .create(kind, &pairs(&["BTC/USD", "ETH/USD"]), lookback)
            .unwrap();
        assert_eq!(source.kind(), expected);
        assert!(!source.is_done());
    }

    #[test_case("kafka", &["BTC/USD"], None, &ConfigurationError::UnknownSourceKind("kafka".to_string()))]
    #[test_case("live", &[], None, &ConfigurationError::EmptyPairs)]
    #[test_case("synthetic", &["BTC/USD", "  "], None, &ConfigurationError::InvalidPair("  ".to_string()))]
    #[test_case("historical", &["BTC/USD"], None, &ConfigurationError::MissingLookback)]
    #[test_case("historical", &["BTC/USD"], Some(Duration::ZERO), &ConfigurationError::InvalidLookback)]
    #[test_case("historical", &["BTC/USD"], Some(Duration::from_secs(u64::MAX)), &ConfigurationError::InvalidLookback; "lookback beyond time delta range")]
    #[test_case("historical", &["BTC/USD"], Some(DAY * 1_000_000_000), &ConfigurationError::InvalidLookback; "lookback before earliest instant")]
    fn invalid_combinations(
        kind: &str,
        names: &[&str],
        lookback: Option<Duration>,
        expected: &ConfigurationError,
    ) {
        let selector = SourceSelector::default();
        let err = selector.create(kind, &pairs(names), lookback).err().unwrap();
        assert_eq!(&err, expected);
    }

    #[test]
    fn zero_synthetic_batch_size_is_rejected() {
        let mut options = SourceOptions::default();
        options.synthetic.batch_size = 0;
        let err = SourceSelector::new(options)
            .create("synthetic", &pairs(&["BTC/USD"]), None)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn fixture_is_filtered_to_requested_pairs() {
        let trade = |pair: &str| {
            CanonicalTrade::from_raw(crate::domain::trade::RawTrade {
                pair: pair.to_string(),
                price: dec!(10),
                volume: dec!(1),
                timestamp: "2023-09-25T07:49:37.708706Z".to_string(),
            })
            .unwrap()
        };
        let options =
            SourceOptions::default().with_fixture(vec![trade("BTC/USD"), trade("ETH/USD"), trade("BTC/USD")]);

        let mut source = SourceSelector::new(options)
            .create("synthetic", &pairs(&["BTC/USD"]), None)
            .unwrap();
        let batch = source.next_batch().await.unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|t| t.pair().as_str() == "BTC/USD"));
        assert!(source.is_done());
    }

    #[test]
    fn options_follow_config() {
        let mut config = IngestConfig::default();
        config.kraken.ws_url = "ws://localhost:9000".to_string();
        config.synthetic.seed = 7;

        let options = SourceOptions::from_config(&config);
        assert_eq!(options.live.url, "ws://localhost:9000");
        assert_eq!(options.synthetic.seed, 7);
        assert_eq!(options.historical.page_size, 1000);
    }
}
