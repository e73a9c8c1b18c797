//! Kraken Live Trade Feed
//!
//! Streams trades from the Kraken v2 websocket. The connection is opened by
//! a reader task spawned on the first poll; the reader normalizes frames and
//! queues them on a bounded channel that `next_batch` drains.
//!
//! # Failure Handling
//!
//! A connection failure, close frame, stream end or rejected subscription
//! ends the feed. Trades queued before the failure are delivered first, the
//! error is returned once, and `is_done()` is true from then on.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::messages::{self, Inbound, SubscribeRequest};
use crate::application::ports::{SourceError, SourceKind, TradeSource};
use crate::domain::trade::{CanonicalTrade, Pair};

/// Frames buffered between the reader task and the poller.
const CHANNEL_CAPACITY: usize = 1024;

/// Live feed configuration.
#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    /// Websocket v2 endpoint.
    pub url: String,
    /// Longest a poll waits for the first trade.
    pub poll_wait: Duration,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            url: "wss://ws.kraken.com/v2".to_string(),
            poll_wait: Duration::from_secs(1),
        }
    }
}

enum FeedEvent {
    Trades(Vec<CanonicalTrade>),
    Failed(SourceError),
}

/// Kraken websocket trade source.
pub struct KrakenLiveFeed {
    config: LiveFeedConfig,
    pairs: Vec<Pair>,
    receiver: Option<mpsc::Receiver<FeedEvent>>,
    cancel: CancellationToken,
    pending_error: Option<SourceError>,
    done: bool,
}

impl KrakenLiveFeed {
    /// Create an unconnected feed for `pairs`.
    #[must_use]
    pub fn new(config: LiveFeedConfig, pairs: Vec<Pair>) -> Self {
        Self {
            config,
            pairs,
            receiver: None,
            cancel: CancellationToken::new(),
            pending_error: None,
            done: false,
        }
    }

    fn ensure_started(&mut self) -> &mut mpsc::Receiver<FeedEvent> {
        self.receiver.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let reader = FeedReader {
                url: self.config.url.clone(),
                subscribe: SubscribeRequest::trades(&self.pairs),
                tx,
            };
            tokio::spawn(reader.run(self.cancel.clone()));
            rx
        })
    }

    fn fail(&mut self, error: SourceError) -> Result<Vec<CanonicalTrade>, SourceError> {
        tracing::error!(error = %error, "Live trade feed failed");
        self.done = true;
        self.receiver = None;
        self.cancel.cancel();
        Err(error)
    }
}

#[async_trait]
impl TradeSource for KrakenLiveFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    async fn next_batch(&mut self) -> Result<Vec<CanonicalTrade>, SourceError> {
        if self.done {
            return Ok(Vec::new());
        }
        if let Some(error) = self.pending_error.take() {
            return self.fail(error);
        }

        let poll_wait = self.config.poll_wait;
        let rx = self.ensure_started();

        let mut batch = Vec::new();
        let mut failure = None;
        match tokio::time::timeout(poll_wait, rx.recv()).await {
            Err(_elapsed) => return Ok(batch),
            Ok(None) => {
                failure = Some(SourceError::Connection(
                    "live feed reader stopped".to_string(),
                ));
            }
            Ok(Some(FeedEvent::Trades(trades))) => batch.extend(trades),
            Ok(Some(FeedEvent::Failed(e))) => failure = Some(e),
        }

        while failure.is_none() {
            match rx.try_recv() {
                Ok(FeedEvent::Trades(trades)) => batch.extend(trades),
                Ok(FeedEvent::Failed(e)) => failure = Some(e),
                Err(_) => break,
            }
        }

        match failure {
            Some(error) if batch.is_empty() => self.fail(error),
            Some(error) => {
                self.pending_error = Some(error);
                Ok(batch)
            }
            None => Ok(batch),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

impl Drop for KrakenLiveFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Reader Task
// =============================================================================

struct FeedReader {
    url: String,
    subscribe: SubscribeRequest,
    tx: mpsc::Sender<FeedEvent>,
}

impl FeedReader {
    async fn run(self, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            outcome = self.stream() => outcome,
        };

        if let Err(error) = outcome {
            let _ = self.tx.send(FeedEvent::Failed(error)).await;
        }
    }

    async fn stream(&self) -> Result<(), SourceError> {
        tracing::info!(url = %self.url, pairs = ?self.subscribe.params.symbol, "Connecting to Kraken trade feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let request = serde_json::to_string(&self.subscribe)
            .map_err(|e| SourceError::Protocol(format!("failed to encode subscribe: {e}")))?;
        write
            .send(Message::Text(request.into()))
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        while let Some(frame) = read.next().await {
            match frame.map_err(|e| SourceError::Connection(e.to_string()))? {
                Message::Text(text) => match messages::decode(text.as_str())? {
                    Inbound::Trades(trades) if trades.is_empty() => {}
                    Inbound::Trades(trades) => {
                        if self.tx.send(FeedEvent::Trades(trades)).await.is_err() {
                            tracing::debug!("Live feed receiver dropped, stopping reader");
                            return Ok(());
                        }
                    }
                    Inbound::SubscribeRejected(reason) => {
                        return Err(SourceError::Protocol(format!(
                            "subscription rejected: {reason}"
                        )));
                    }
                    Inbound::Ignored => {}
                },
                Message::Ping(data) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| SourceError::Connection(e.to_string()))?;
                }
                Message::Close(frame) => {
                    tracing::info!(frame = ?frame, "Kraken sent close frame");
                    return Err(SourceError::Connection(
                        "connection closed by server".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Err(SourceError::Connection("websocket stream ended".to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
