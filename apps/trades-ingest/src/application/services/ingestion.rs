//! Ingestion Loop
//!
//! Pulls batches from a `TradeSource` and publishes every record, in order,
//! through a `Publisher`.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Polling ──(≥1 record)──► Publishing ──(batch done)──► Polling
//!             │
//!             └──(empty & source done)──► Terminated
//!
//! any ──(cancel)──► Draining ──► Terminated
//! ```
//!
//! Cancellation is cooperative. It is observed before each record, while
//! waiting on `next_batch()`, and during the empty-batch backoff. A publish
//! already underway always runs to completion.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::application::ports::{PublishError, Publisher, SourceError, SourceKind, TradeSource};
use crate::infrastructure::metrics;

/// Default pause before re-polling after an empty batch.
const DEFAULT_EMPTY_BATCH_BACKOFF: Duration = Duration::from_millis(100);

// =============================================================================
// Settings and Reporting
// =============================================================================

/// Ingestion loop tuning.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Pause before re-polling a source that returned nothing and is not done.
    pub empty_batch_backoff: Duration,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            empty_batch_backoff: DEFAULT_EMPTY_BATCH_BACKOFF,
        }
    }
}

/// Observable loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, not yet running.
    Idle,
    /// Waiting on the source for a batch.
    Polling,
    /// Publishing records of the current batch.
    Publishing,
    /// Cancellation observed, winding down.
    Draining,
    /// Loop has exited.
    Terminated,
}

/// Why the loop exited cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Source reported done and returned an empty batch.
    Exhausted,
    /// Cancellation was requested.
    Cancelled,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionReport {
    /// Batches pulled from the source, including empty ones.
    pub batches_polled: u64,
    /// Records accepted by the publisher.
    pub records_published: u64,
    /// Exit reason.
    pub exit: LoopExit,
}

/// Fatal loop errors. The loop stops and hands these upward.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The source failed to produce a batch.
    #[error("trade source failed: {0}")]
    Source(#[from] SourceError),

    /// A record could not be published.
    #[error("publish failed for key {key} after {published} records: {source}")]
    Publish {
        /// Message key of the failed record.
        key: String,
        /// Records successfully published before the failure.
        published: u64,
        /// Underlying publisher error.
        #[source]
        source: PublishError,
    },
}

// =============================================================================
// Ingestion Context
// =============================================================================

/// Collaborators borrowed by the loop for the duration of one run.
///
/// The loop only calls `publish` on the publisher; its session lifecycle
/// belongs to whoever owns it.
pub struct IngestionContext<'a> {
    /// Source to poll.
    pub source: &'a mut dyn TradeSource,
    /// Publisher to send through.
    pub publisher: &'a dyn Publisher,
}

#[derive(Debug, Default)]
struct Counters {
    batches_polled: u64,
    records_published: u64,
}

// =============================================================================
// Ingestion Loop
// =============================================================================

/// Polling loop moving trades from a source to a publisher.
#[derive(Debug)]
pub struct IngestionLoop {
    settings: IngestionSettings,
    cancel: CancellationToken,
    state: parking_lot::RwLock<LoopState>,
}

impl IngestionLoop {
    /// Create a loop that stops when `cancel` fires.
    #[must_use]
    pub const fn new(settings: IngestionSettings, cancel: CancellationToken) -> Self {
        Self {
            settings,
            cancel,
            state: parking_lot::RwLock::new(LoopState::Idle),
        }
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.read()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run until the source is exhausted, cancellation is requested, or a
    /// fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Source` if the source fails and
    /// `IngestError::Publish` if a record cannot be published.
    pub async fn run(&self, ctx: IngestionContext<'_>) -> Result<IngestionReport, IngestError> {
        let IngestionContext { source, publisher } = ctx;
        let kind = source.kind();
        let mut counters = Counters::default();

        tracing::info!(source = kind.as_str(), "Ingestion loop started");

        let result = self.drive(kind, source, publisher, &mut counters).await;
        self.set_state(LoopState::Terminated);

        match result {
            Ok(exit) => {
                tracing::info!(
                    source = kind.as_str(),
                    exit = ?exit,
                    batches = counters.batches_polled,
                    published = counters.records_published,
                    "Ingestion loop terminated"
                );
                Ok(IngestionReport {
                    batches_polled: counters.batches_polled,
                    records_published: counters.records_published,
                    exit,
                })
            }
            Err(e) => {
                tracing::error!(
                    source = kind.as_str(),
                    error = %e,
                    published = counters.records_published,
                    "Ingestion loop failed"
                );
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        kind: SourceKind,
        source: &mut dyn TradeSource,
        publisher: &dyn Publisher,
        counters: &mut Counters,
    ) -> Result<LoopExit, IngestError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.drain());
            }

            self.set_state(LoopState::Polling);
            let batch = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(self.drain()),
                batch = source.next_batch() => batch.inspect_err(|_| metrics::record_source_error(kind))?,
            };
            counters.batches_polled += 1;
            metrics::record_batch_polled(kind, batch.len());

            if batch.is_empty() {
                if source.is_done() {
                    return Ok(LoopExit::Exhausted);
                }
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Ok(self.drain()),
                    () = tokio::time::sleep(self.settings.empty_batch_backoff) => {}
                }
                continue;
            }

            tracing::debug!(records = batch.len(), "Publishing batch");
            self.set_state(LoopState::Publishing);

            for record in batch {
                if self.cancel.is_cancelled() {
                    return Ok(self.drain());
                }

                let key = record.pair().bus_key();
                let started = Instant::now();

                if let Err(source) = publisher.publish(&key, &record).await {
                    metrics::record_publish_error();
                    return Err(IngestError::Publish {
                        key,
                        published: counters.records_published,
                        source,
                    });
                }

                metrics::record_trade_published(record.pair().as_str(), started.elapsed());
                counters.records_published += 1;

                tracing::debug!(
                    key = %key,
                    price = %record.price(),
                    volume = %record.volume(),
                    timestamp_ms = record.event_time_millis(),
                    "Published trade"
                );
            }
        }
    }

    fn drain(&self) -> LoopExit {
        self.set_state(LoopState::Draining);
        tracing::info!("Cancellation observed, draining ingestion loop");
        LoopExit::Cancelled
    }

    fn set_state(&self, state: LoopState) {
        *self.state.write() = state;
    }
}

// =============================================================================
// Tests
// =============================================================================
