//! Message Bus Adapters
//!
//! `Publisher` implementations. Every message is keyed by the bus-safe pair
//! key and carries the canonical trade serialized as JSON.
//!
//! # Adapters
//!
//! - `BroadcastPublisher`: in-process topic for subscribers in this process
//! - `JsonLinesPublisher`: one JSON object per line in a local file

mod broadcast;
mod jsonl;

use std::sync::Arc;

pub use broadcast::BroadcastPublisher;
pub use jsonl::JsonLinesPublisher;

use crate::application::ports::{PublishError, Publisher};
use crate::domain::trade::CanonicalTrade;
use crate::infrastructure::config::{BusKind, BusSettings};

/// A keyed message as handed to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic name.
    pub topic: String,
    /// Partition key.
    pub key: String,
    /// JSON-encoded canonical trade.
    pub value: Vec<u8>,
}

impl BusMessage {
    /// Encode `record` for `topic` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Serialization` if the record cannot be encoded.
    pub fn encode(topic: &str, key: &str, record: &CanonicalTrade) -> Result<Self, PublishError> {
        let value = serde_json::to_vec(record).map_err(|e| PublishError::Serialization {
            message: e.to_string(),
        })?;
        Ok(Self {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
        })
    }

    /// Decode the value back into a trade.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Serialization` if the value is not a valid
    /// canonical trade.
    pub fn decode_value(&self) -> Result<CanonicalTrade, PublishError> {
        serde_json::from_slice(&self.value).map_err(|e| PublishError::Serialization {
            message: e.to_string(),
        })
    }
}

/// Build the publisher selected by `settings`.
#[must_use]
pub fn build_publisher(settings: &BusSettings) -> Arc<dyn Publisher> {
    tracing::info!(bus = settings.kind.as_str(), topic = %settings.topic, "Configuring publisher");
    match settings.kind {
        BusKind::Broadcast => Arc::new(BroadcastPublisher::new(
            settings.topic.clone(),
            settings.capacity,
        )),
        BusKind::JsonLines => Arc::new(JsonLinesPublisher::new(
            settings.topic.clone(),
            settings.jsonl_path.clone(),
        )),
    }
}
