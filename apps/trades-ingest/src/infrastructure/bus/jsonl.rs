//! JSON Lines Publisher
//!
//! Appends each message as one line `{"topic","key","value"}` to a local
//! file. Writes are buffered until `stop`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::application::ports::{PublishError, Publisher};
use crate::domain::trade::CanonicalTrade;

#[derive(Serialize)]
struct Line<'a> {
    topic: &'a str,
    key: &'a str,
    value: &'a CanonicalTrade,
}

/// File-backed topic.
#[derive(Debug)]
pub struct JsonLinesPublisher {
    topic: String,
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLinesPublisher {
    /// Create a stopped publisher appending to `path`.
    #[must_use]
    pub fn new(topic: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            path: path.into(),
            writer: Mutex::new(None),
        }
    }
}

fn io_error(e: &std::io::Error) -> PublishError {
    PublishError::Io {
        message: e.to_string(),
    }
}

#[async_trait]
impl Publisher for JsonLinesPublisher {
    async fn start(&self) -> Result<(), PublishError> {
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&e))?;
        *writer = Some(BufWriter::new(file));

        tracing::info!(path = %self.path.display(), topic = %self.topic, "JSON lines topic opened");
        Ok(())
    }

    async fn publish(&self, key: &str, record: &CanonicalTrade) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(&Line {
            topic: &self.topic,
            key,
            value: record,
        })
        .map_err(|e| PublishError::Serialization {
            message: e.to_string(),
        })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let Some(out) = writer.as_mut() else {
            return Err(PublishError::NotStarted);
        };
        out.write_all(&line).await.map_err(|e| PublishError::SendFailed {
            message: e.to_string(),
        })
    }

    async fn stop(&self) -> Result<(), PublishError> {
        let Some(mut out) = self.writer.lock().await.take() else {
            return Ok(());
        };
        out.flush().await.map_err(|e| io_error(&e))?;
        out.into_inner().sync_all().await.map_err(|e| io_error(&e))?;

        tracing::info!(path = %self.path.display(), "JSON lines topic closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::trade::RawTrade;

    fn trade(timestamp: &str) -> CanonicalTrade {
        CanonicalTrade::from_raw(RawTrade {
            pair: "BTC/USD".to_string(),
            price: dec!(50000.0),
            volume: dec!(0.1),
            timestamp: timestamp.to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn writes_one_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let publisher = JsonLinesPublisher::new("trades", &path);

        publisher.start().await.unwrap();
        publisher
            .publish("BTC-USD", &trade("2023-09-25T07:49:37.708706Z"))
            .await
            .unwrap();
        publisher
            .publish("BTC-USD", &trade("2023-09-25T07:49:38.000001Z"))
            .await
            .unwrap();
        publisher.stop().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["topic"], "trades");
        assert_eq!(lines[0]["key"], "BTC-USD");
        assert_eq!(lines[0]["value"]["timestamp"], "2023-09-25T07:49:37.708706");
        assert_eq!(lines[1]["value"]["timestamp_ms"], 1_695_628_178_000_i64);
    }

    #[tokio::test]
    async fn appends_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");

        for _ in 0..2 {
            let publisher = JsonLinesPublisher::new("trades", &path);
            publisher.start().await.unwrap();
            publisher
                .publish("BTC-USD", &trade("2023-09-25T07:49:37.708706Z"))
                .await
                .unwrap();
            publisher.stop().await.unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn stop_without_start_is_noop_and_publish_needs_start() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = JsonLinesPublisher::new("trades", dir.path().join("never.jsonl"));

        publisher.stop().await.unwrap();
        assert!(matches!(
            publisher
                .publish("BTC-USD", &trade("2023-09-25T07:49:37.708706Z"))
                .await,
            Err(PublishError::NotStarted)
        ));
        assert!(!dir.path().join("never.jsonl").exists());
    }

    #[tokio::test]
    async fn unwritable_path_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = JsonLinesPublisher::new("trades", dir.path().join("missing/dir/out.jsonl"));
        assert!(matches!(publisher.start().await, Err(PublishError::Io { .. })));
    }
}
