//! Publisher Port (Driven Port)
//!
//! Narrow contract over a message-bus session. The lifecycle owns the
//! session; the ingestion loop only ever calls `publish`.

use async_trait::async_trait;

use crate::domain::trade::CanonicalTrade;

/// Bus publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Publish attempted without a started session.
    #[error("publisher is not started")]
    NotStarted,

    /// Record could not be serialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Underlying error.
        message: String,
    },

    /// The bus client rejected the send.
    #[error("send failed: {message}")]
    SendFailed {
        /// Underlying error.
        message: String,
    },

    /// Session I/O failed.
    #[error("publisher I/O error: {message}")]
    Io {
        /// Underlying error.
        message: String,
    },
}

/// Port for publishing canonical trades as keyed messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Acquire the bus session. Called exactly once by the lifecycle.
    async fn start(&self) -> Result<(), PublishError>;

    /// Send `record` keyed by `key`. Returns once the client accepted it.
    async fn publish(&self, key: &str, record: &CanonicalTrade) -> Result<(), PublishError>;

    /// Release the session, flushing buffered sends.
    ///
    /// A no-op when nothing was started, and safe after a failed `start`.
    async fn stop(&self) -> Result<(), PublishError>;
}
