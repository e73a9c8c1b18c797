//! Synthetic Trade Source
//!
//! Deterministic in-memory trade sequence for tests and dry runs, emitted in
//! fixed-size batches.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::application::ports::{SourceError, SourceKind, TradeSource};
use crate::domain::trade::{CanonicalTrade, Pair, TradeError};

/// Spacing between generated trades, in milliseconds.
const TICK_MILLIS: i64 = 100;

/// Fixed sequence of trades.
#[derive(Debug)]
pub struct SyntheticSource {
    remaining: VecDeque<CanonicalTrade>,
    batch_size: usize,
}

impl SyntheticSource {
    /// Emit `trades` as given.
    ///
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn from_trades(trades: Vec<CanonicalTrade>, batch_size: usize) -> Self {
        Self {
            remaining: trades.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Generate `per_pair` trades for each pair.
    ///
    /// Prices follow a seeded random walk per pair; timestamps start at
    /// `start` and advance by 100 ms per trade, round-robin across pairs.
    ///
    /// # Errors
    ///
    /// Returns a `TradeError` if a generated record fails validation.
    pub fn generated(
        pairs: &[Pair],
        per_pair: usize,
        batch_size: usize,
        seed: u64,
        start: DateTime<Utc>,
    ) -> Result<Self, TradeError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut prices: Vec<Decimal> = pairs
            .iter()
            .map(|_| Decimal::from(rng.random_range(100_i64..60_000)))
            .collect();

        let mut trades = Vec::with_capacity(pairs.len() * per_pair);
        let mut event_time = start;
        let tick = ChronoDuration::milliseconds(TICK_MILLIS);

        for _ in 0..per_pair {
            for (pair, price) in pairs.iter().zip(prices.iter_mut()) {
                // Random walk in basis points, floored at one cent.
                let step = Decimal::new(rng.random_range(-50..=50), 4);
                *price = (*price * (Decimal::ONE + step))
                    .round_dp(2)
                    .max(Decimal::new(1, 2));
                let volume = Decimal::new(rng.random_range(1..=100_000), 5);

                trades.push(CanonicalTrade::new(pair.clone(), *price, volume, event_time)?);
                event_time += tick;
            }
        }

        Ok(Self::from_trades(trades, batch_size))
    }

    /// Records not yet emitted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

#[async_trait]
impl TradeSource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    async fn next_batch(&mut self) -> Result<Vec<CanonicalTrade>, SourceError> {
        let take = self.batch_size.min(self.remaining.len());
        Ok(self.remaining.drain(..take).collect())
    }

    fn is_done(&self) -> bool {
        self.remaining.is_empty()
    }
}
