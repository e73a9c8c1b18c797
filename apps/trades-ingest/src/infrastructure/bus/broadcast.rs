//! In-Process Broadcast Publisher
//!
//! Fans keyed trade messages out to every subscriber in this process through
//! a tokio broadcast channel.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::BusMessage;
use crate::application::ports::{PublishError, Publisher};
use crate::domain::trade::CanonicalTrade;

/// Channel state across a publisher session.
#[derive(Debug)]
enum Channel {
    /// Accepting subscribers, not yet publishes.
    Pending(broadcast::Sender<BusMessage>),
    /// Between `start` and `stop`.
    Open(broadcast::Sender<BusMessage>),
    /// Stopped; existing receivers have observed the close.
    Closed,
}

impl Channel {
    const fn sender(&self) -> Option<&broadcast::Sender<BusMessage>> {
        match self {
            Self::Pending(tx) | Self::Open(tx) => Some(tx),
            Self::Closed => None,
        }
    }
}

/// Broadcast-channel topic.
///
/// Subscribers may attach from construction on, so a consumer wired up
/// before the pipeline starts sees every message. Publishing is accepted
/// only between `start` and `stop`. Subscribers that fall more than
/// `capacity` messages behind observe a lag on their receiver.
#[derive(Debug)]
pub struct BroadcastPublisher {
    topic: String,
    capacity: usize,
    channel: RwLock<Channel>,
}

impl BroadcastPublisher {
    /// Create a publisher for `topic` that is not yet started.
    #[must_use]
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            topic: topic.into(),
            capacity,
            channel: RwLock::new(Channel::Pending(tx)),
        }
    }

    /// Subscribe to messages published from now on.
    ///
    /// Returns `None` once the publisher has been stopped.
    #[must_use]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<BusMessage>> {
        self.channel
            .read()
            .sender()
            .map(broadcast::Sender::subscribe)
    }

    /// Current subscriber count.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.channel
            .read()
            .sender()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn start(&self) -> Result<(), PublishError> {
        let mut channel = self.channel.write();
        let tx = match &*channel {
            Channel::Open(_) => return Ok(()),
            Channel::Pending(tx) => tx.clone(),
            Channel::Closed => broadcast::channel(self.capacity).0,
        };
        *channel = Channel::Open(tx);
        drop(channel);

        tracing::info!(topic = %self.topic, capacity = self.capacity, "Broadcast topic opened");
        Ok(())
    }

    async fn publish(&self, key: &str, record: &CanonicalTrade) -> Result<(), PublishError> {
        let message = BusMessage::encode(&self.topic, key, record)?;
        let channel = self.channel.read();
        let Channel::Open(tx) = &*channel else {
            return Err(PublishError::NotStarted);
        };

        if tx.send(message).is_err() {
            tracing::trace!(key, "No subscribers for trade message");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), PublishError> {
        let mut channel = self.channel.write();
        if matches!(*channel, Channel::Open(_)) {
            *channel = Channel::Closed;
            drop(channel);
            tracing::info!(topic = %self.topic, "Broadcast topic closed");
        }
        Ok(())
    }
}
