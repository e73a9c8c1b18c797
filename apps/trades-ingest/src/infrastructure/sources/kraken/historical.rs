//! Kraken Historical Trade Source
//!
//! Pages `GET /0/public/Trades` over a lookback window, one pair after
//! another. The window is `[now - lookback, now)` with `now` fixed at the
//! first poll, so trades arriving while paging never extend it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{HistoricalRow, RestEnvelope};
use crate::application::ports::{ConfigurationError, SourceError, SourceKind, TradeSource};
use crate::domain::trade::{CanonicalTrade, Pair};

const TRADES_PATH: &str = "/0/public/Trades";

/// Historical source configuration.
#[derive(Debug, Clone)]
pub struct HistoricalConfig {
    /// REST API base URL.
    pub base_url: String,
    /// Trades requested per page.
    pub page_size: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.kraken.com".to_string(),
            page_size: 1000,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct PairCursor {
    pair: Pair,
    since: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    end: DateTime<Utc>,
    end_seconds: Decimal,
}

/// Kraken REST trade history source.
pub struct KrakenHistoricalSource {
    client: reqwest::Client,
    config: HistoricalConfig,
    lookback: Duration,
    pending: Vec<Pair>,
    cursors: Vec<PairCursor>,
    window: Option<Window>,
    current: usize,
    done: bool,
}

impl KrakenHistoricalSource {
    /// Create a source over `[now - lookback, now)` for `pairs`.
    ///
    /// Only builds the HTTP client; nothing is requested until the first
    /// poll.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidLookback` if `now - lookback` is
    /// not a representable instant, and `ConfigurationError::InvalidParameter`
    /// if the page size is zero or the HTTP client cannot be built.
    pub fn new(
        config: HistoricalConfig,
        pairs: Vec<Pair>,
        lookback: Duration,
    ) -> Result<Self, ConfigurationError> {
        if window_start(Utc::now(), lookback).is_none() {
            return Err(ConfigurationError::InvalidLookback);
        }
        if config.page_size == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "historical page size",
                reason: "must be at least 1".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigurationError::InvalidParameter {
                name: "http client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            config,
            lookback,
            pending: pairs,
            cursors: Vec::new(),
            window: None,
            current: 0,
            done: false,
        })
    }

    /// Fix the window on first use.
    fn window(&mut self) -> Result<Window, SourceError> {
        if let Some(window) = self.window {
            return Ok(window);
        }

        let end = Utc::now();
        let start = window_start(end, self.lookback).ok_or_else(|| {
            SourceError::Protocol(format!("lookback {:?} out of range", self.lookback))
        })?;
        let since = start
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0);

        self.cursors = self
            .pending
            .drain(..)
            .map(|pair| PairCursor { pair, since })
            .collect();

        let window = Window {
            end,
            end_seconds: epoch_seconds(end),
        };
        tracing::info!(
            start = %start,
            end = %end,
            pairs = self.cursors.len(),
            "Historical window fixed"
        );
        self.window = Some(window);
        Ok(window)
    }

    async fn fetch_page(&self, cursor: &PairCursor) -> Result<RestEnvelope, SourceError> {
        let url = format!("{}{TRADES_PATH}", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(&[
                ("pair", cursor.pair.as_str().to_string()),
                ("since", cursor.since.to_string()),
                ("count", self.config.page_size.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http(format!(
                "unexpected status {status} for {}",
                cursor.pair
            )));
        }

        let envelope: RestEnvelope = response
            .json()
            .await
            .map_err(|e| SourceError::Protocol(format!("invalid trades response: {e}")))?;

        if !envelope.error.is_empty() {
            return Err(SourceError::Api(envelope.error.join("; ")));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl TradeSource for KrakenHistoricalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Historical
    }

    async fn next_batch(&mut self) -> Result<Vec<CanonicalTrade>, SourceError> {
        if self.done {
            return Ok(Vec::new());
        }
        let window = self.window()?;

        while let Some(cursor) = self.cursors.get(self.current) {
            let envelope = self.fetch_page(cursor).await?;
            let pair = cursor.pair.clone();
            let since = cursor.since;

            let (rows, next) = match envelope.result {
                Some(result) => (result.rows()?, result.last_cursor()?),
                None => (Vec::new(), None),
            };

            let fetched = rows.len();
            let (batch, reached_end) = normalize_page(&pair, rows, window.end_seconds)?;
            let advanced = next.filter(|&n| n > since);

            tracing::debug!(
                pair = %pair,
                since,
                fetched,
                kept = batch.len(),
                "Fetched historical page"
            );

            match advanced {
                Some(next) if fetched > 0 && !reached_end => {
                    if let Some(cursor) = self.cursors.get_mut(self.current) {
                        cursor.since = next;
                    }
                }
                _ => {
                    tracing::info!(pair = %pair, window_end = %window.end, "Historical pair complete");
                    self.current += 1;
                }
            }

            if !batch.is_empty() {
                return Ok(batch);
            }
        }

        self.done = true;
        Ok(Vec::new())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// Keep rows before the window end, in page order.
fn normalize_page(
    pair: &Pair,
    rows: Vec<HistoricalRow>,
    end_seconds: Decimal,
) -> Result<(Vec<CanonicalTrade>, bool), SourceError> {
    let mut batch = Vec::with_capacity(rows.len());
    let mut reached_end = false;

    for row in rows {
        if row.time >= end_seconds {
            reached_end = true;
            break;
        }
        batch.push(CanonicalTrade::from_epoch_seconds(
            pair.clone(),
            row.price,
            row.volume,
            row.time,
        )?);
    }

    Ok((batch, reached_end))
}

/// `end - lookback`, or `None` when it falls outside the `DateTime` range.
fn window_start(end: DateTime<Utc>, lookback: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|lookback| end.checked_sub_signed(lookback))
}

fn epoch_seconds(instant: DateTime<Utc>) -> Decimal {
    Decimal::from(instant.timestamp())
        + Decimal::new(i64::from(instant.timestamp_subsec_micros()), 6)
}

// =============================================================================
// Tests
// =============================================================================
