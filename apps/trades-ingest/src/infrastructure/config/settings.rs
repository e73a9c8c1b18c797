//! Ingestion Configuration Settings
//!
//! Configuration types for the service, loaded from environment variables.
//! Numeric settings fall back to their defaults when unset or unparsable;
//! the source kind is validated later by the source selector.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{IngestionSettings, PipelineConfig};

const SECONDS_PER_DAY: u64 = 86_400;

/// Which publisher adapter carries messages to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    /// In-process broadcast topic.
    #[default]
    Broadcast,
    /// Newline-delimited JSON file.
    JsonLines,
}

impl BusKind {
    /// Parse a bus kind.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for anything but `broadcast` or
    /// `jsonl`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "jsonl" | "json-lines" => Ok(Self::JsonLines),
            _ => Err(ConfigError::InvalidValue {
                key: "BUS_KIND".to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Bus kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::JsonLines => "jsonl",
        }
    }
}

/// Trade source selection.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Declarative source identifier (`live`, `historical`, `synthetic`).
    pub kind: String,
    /// Pairs to subscribe to or query.
    pub pairs: Vec<String>,
    /// Lookback window for the historical source.
    pub lookback: Option<Duration>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: "live".to_string(),
            pairs: vec!["BTC/USD".to_string()],
            lookback: None,
        }
    }
}

/// Kraken endpoints and polling behavior.
#[derive(Debug, Clone)]
pub struct KrakenSettings {
    /// Websocket v2 endpoint.
    pub ws_url: String,
    /// REST API base URL.
    pub rest_url: String,
    /// How long the live feed waits for a first record per poll.
    pub live_poll_wait: Duration,
    /// Trades requested per historical page.
    pub historical_page_size: u32,
    /// REST request timeout.
    pub http_timeout: Duration,
}

impl Default for KrakenSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.kraken.com/v2".to_string(),
            rest_url: "https://api.kraken.com".to_string(),
            live_poll_wait: Duration::from_secs(1),
            historical_page_size: 1000,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Synthetic fixture generation.
#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    /// Generated trades per pair.
    pub trades_per_pair: usize,
    /// Records per batch.
    pub batch_size: usize,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            trades_per_pair: 100,
            batch_size: 10,
            seed: 42,
        }
    }
}

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Adapter kind.
    pub kind: BusKind,
    /// Topic name.
    pub topic: String,
    /// Broadcast channel capacity.
    pub capacity: usize,
    /// Output file for the JSON-lines adapter.
    pub jsonl_path: PathBuf,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            kind: BusKind::Broadcast,
            topic: "trades".to_string(),
            capacity: 10_000,
            jsonl_path: PathBuf::from("trades.jsonl"),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Status/health/metrics HTTP port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8000 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Trade source selection.
    pub source: SourceSettings,
    /// Ingestion loop tuning.
    pub ingestion: IngestionSettings,
    /// Kraken source settings.
    pub kraken: KrakenSettings,
    /// Synthetic source settings.
    pub synthetic: SyntheticSettings,
    /// Publisher settings.
    pub bus: BusSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value that has no sensible fallback is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unparsable lookback or an
    /// unknown bus kind.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            kind: env.string("TRADES_SOURCE", &source_defaults.kind),
            pairs: env
                .get("TRADES_PAIRS")
                .map_or(source_defaults.pairs, |raw| parse_pairs(&raw)),
            lookback: env.lookback_days("TRADES_LOOKBACK_DAYS")?,
        };

        let ingestion = IngestionSettings {
            empty_batch_backoff: env.millis(
                "TRADES_EMPTY_BATCH_BACKOFF_MS",
                IngestionSettings::default().empty_batch_backoff,
            ),
        };

        let kraken_defaults = KrakenSettings::default();
        let kraken = KrakenSettings {
            ws_url: env.string("KRAKEN_WS_URL", &kraken_defaults.ws_url),
            rest_url: env.string("KRAKEN_REST_URL", &kraken_defaults.rest_url),
            live_poll_wait: env.millis("TRADES_LIVE_POLL_WAIT_MS", kraken_defaults.live_poll_wait),
            historical_page_size: env.parse(
                "TRADES_HISTORICAL_PAGE_SIZE",
                kraken_defaults.historical_page_size,
            ),
            http_timeout: env.secs("TRADES_HTTP_TIMEOUT_SECS", kraken_defaults.http_timeout),
        };

        let synthetic_defaults = SyntheticSettings::default();
        let synthetic = SyntheticSettings {
            trades_per_pair: env.parse(
                "SYNTHETIC_TRADES_PER_PAIR",
                synthetic_defaults.trades_per_pair,
            ),
            batch_size: env.parse("SYNTHETIC_BATCH_SIZE", synthetic_defaults.batch_size),
            seed: env.parse("SYNTHETIC_SEED", synthetic_defaults.seed),
        };

        let bus_defaults = BusSettings::default();
        let bus = BusSettings {
            kind: env
                .get("BUS_KIND")
                .map_or(Ok(bus_defaults.kind), |raw| BusKind::parse(&raw))?,
            topic: env.string("BUS_TOPIC", &bus_defaults.topic),
            capacity: env.parse("BUS_CAPACITY", bus_defaults.capacity),
            jsonl_path: env
                .get("BUS_JSONL_PATH")
                .map_or(bus_defaults.jsonl_path, PathBuf::from),
        };

        let server = ServerSettings {
            http_port: env.parse("TRADES_HTTP_PORT", ServerSettings::default().http_port),
        };

        Ok(Self {
            source,
            ingestion,
            kraken,
            synthetic,
            bus,
            server,
        })
    }

    /// Pipeline configuration derived from these settings.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            source_kind: self.source.kind.clone(),
            pairs: self.source.pairs.clone(),
            lookback: self.source.lookback,
            ingestion: self.ingestion.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting had a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

/// Comma-separated pair list; blank entries are dropped.
fn parse_pairs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(ToString::to_string)
        .collect()
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn lookback_days(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        let Some(raw) = self.get(key).filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };

        raw.trim()
            .parse::<u64>()
            .ok()
            .and_then(|days| days.checked_mul(SECONDS_PER_DAY))
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            })
    }
}
