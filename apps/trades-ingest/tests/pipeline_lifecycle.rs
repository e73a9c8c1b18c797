//! Pipeline lifecycle integration tests.
//!
//! Runs source selection, the ingestion loop and publishers together through
//! `PipelineLifecycle`, the way the binary wires them.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use trades_ingest::{
    BroadcastPublisher, CanonicalTrade, ConfigurationError, IngestError, IngestionSettings,
    JsonLinesPublisher, LoopExit, PipelineConfig, PipelineError, PipelineLifecycle, PipelineState,
    PublishError, Publisher, RawTrade, SourceOptions, SourceSelector,
};

// =============================================================================
// Helpers
// =============================================================================

const WAIT: Duration = Duration::from_secs(5);

fn trade(pair: &str, price: &str, volume: &str, timestamp: &str) -> CanonicalTrade {
    CanonicalTrade::from_raw(RawTrade {
        pair: pair.to_string(),
        price: Decimal::from_str(price).unwrap(),
        volume: Decimal::from_str(volume).unwrap(),
        timestamp: timestamp.to_string(),
    })
    .unwrap()
}

fn numbered_trades(count: u32) -> Vec<CanonicalTrade> {
    (1..=count)
        .map(|i| {
            trade(
                "BTC/USD",
                &format!("{}.5", 50_000 + i),
                "0.1",
                &format!("2023-09-25T07:49:{i:02}.000000Z"),
            )
        })
        .collect()
}

fn config(kind: &str, pairs: &[&str]) -> PipelineConfig {
    PipelineConfig {
        source_kind: kind.to_string(),
        pairs: pairs.iter().map(ToString::to_string).collect(),
        lookback: None,
        ingestion: IngestionSettings::default(),
    }
}

fn fixture_selector(trades: Vec<CanonicalTrade>, batch_size: usize) -> SourceSelector {
    let mut options = SourceOptions::default().with_fixture(trades);
    options.synthetic.batch_size = batch_size;
    SourceSelector::new(options)
}

/// Publisher double recording every accepted message.
#[derive(Default)]
struct RecordingPublisher {
    messages: parking_lot::Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_on: Option<usize>,
    fail_start: bool,
    gate: Option<Gate>,
}

/// Holds the first publish until released.
struct Gate {
    entered: Notify,
    release: Notify,
}

impl RecordingPublisher {
    fn keys(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn start(&self) -> Result<(), PublishError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(PublishError::Io {
                message: "broker unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, key: &str, record: &CanonicalTrade) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stops() > 0 {
            panic!("publish after stop");
        }

        if let Some(gate) = &self.gate
            && attempt == 1
        {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.fail_on == Some(attempt) {
            return Err(PublishError::SendFailed {
                message: "broker rejected message".to_string(),
            });
        }

        let value = serde_json::to_string(record).unwrap();
        self.messages.lock().push((key.to_string(), value));
        Ok(())
    }

    async fn stop(&self) -> Result<(), PublishError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn run_to_completion(
    pipeline: &mut PipelineLifecycle,
) -> Result<Option<trades_ingest::IngestionReport>, PipelineError> {
    pipeline.on_startup().await?;
    tokio::time::timeout(WAIT, pipeline.finished())
        .await
        .expect("ingestion loop should finish");
    pipeline.on_shutdown().await
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn fixture_record_is_published_in_canonical_shape() {
    let fixture = vec![trade(
        "BTC/USD",
        "50000.0",
        "0.1",
        "2023-09-25T07:49:37.708706Z",
    )];
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(fixture, 10),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    let report = run_to_completion(&mut pipeline).await.unwrap().unwrap();

    assert_eq!(report.exit, LoopExit::Exhausted);
    assert_eq!(report.records_published, 1);
    assert_eq!(
        *publisher.messages.lock(),
        vec![(
            "BTC-USD".to_string(),
            r#"{"pair":"BTC/USD","price":50000.0,"volume":0.1,"timestamp":"2023-09-25T07:49:37.708706","timestamp_ms":1695628177708}"#
                .to_string()
        )]
    );
    assert_eq!(publisher.stops(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn publishes_every_fixture_record_in_order() {
    let fixture = numbered_trades(7);
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(fixture.clone(), 3),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    let report = run_to_completion(&mut pipeline).await.unwrap().unwrap();

    assert_eq!(report.records_published, 7);
    // 3 + 3 + 1, then the empty pull that observes exhaustion.
    assert_eq!(report.batches_polled, 4);

    let published: Vec<CanonicalTrade> = publisher
        .messages
        .lock()
        .iter()
        .map(|(_, v)| serde_json::from_str(v).unwrap())
        .collect();
    assert_eq!(published, fixture);
    assert!(publisher.keys().iter().all(|k| k == "BTC-USD"));
    assert_eq!(publisher.stops(), 1);
}

#[tokio::test]
async fn cancellation_finishes_inflight_publish_and_stops_once() {
    let publisher = Arc::new(RecordingPublisher {
        gate: Some(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        }),
        ..RecordingPublisher::default()
    });
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(5), 5),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    pipeline.on_startup().await.unwrap();
    let gate = publisher.gate.as_ref().unwrap();
    tokio::time::timeout(WAIT, gate.entered.notified())
        .await
        .expect("first publish should start");

    let (outcome, ()) = tokio::join!(pipeline.on_shutdown(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.release.notify_one();
    });

    let report = outcome.unwrap().unwrap();
    assert_eq!(report.exit, LoopExit::Cancelled);
    assert_eq!(report.records_published, 1);
    assert_eq!(publisher.keys(), vec!["BTC-USD"]);
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.stops(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn publish_error_on_third_record_stops_pipeline() {
    let publisher = Arc::new(RecordingPublisher {
        fail_on: Some(3),
        ..RecordingPublisher::default()
    });
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(5), 5),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    let err = run_to_completion(&mut pipeline).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Ingest(IngestError::Publish {
            published: 2,
            source: PublishError::SendFailed { .. },
            ..
        })
    ));
    assert_eq!(publisher.keys().len(), 2);
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(publisher.stops(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn configuration_error_surfaces_before_publisher_start() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = PipelineLifecycle::new(
        config("carrier-pigeon", &["BTC/USD"]),
        SourceSelector::default(),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    let err = pipeline.on_startup().await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Configuration(ConfigurationError::UnknownSourceKind(_))
    ));
    assert_eq!(publisher.starts.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.state(), PipelineState::Created);
    assert!(!pipeline.status().is_running());

    assert!(matches!(
        pipeline.on_startup().await,
        Err(PipelineError::NotRestartable)
    ));
    assert!(pipeline.on_shutdown().await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_historical_lookback_is_rejected_before_start() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut historical = config("historical", &["BTC/USD"]);
    historical.lookback = Some(Duration::from_secs(86_400 * 1_000_000_000));
    let mut pipeline = PipelineLifecycle::new(
        historical,
        SourceSelector::default(),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    assert!(matches!(
        pipeline.on_startup().await,
        Err(PipelineError::Configuration(
            ConfigurationError::InvalidLookback
        ))
    ));
    assert_eq!(publisher.starts.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.state(), PipelineState::Created);
}

#[tokio::test]
async fn historical_without_lookback_is_rejected() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = PipelineLifecycle::new(
        config("historical", &["BTC/USD"]),
        SourceSelector::default(),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    assert!(matches!(
        pipeline.on_startup().await,
        Err(PipelineError::Configuration(
            ConfigurationError::MissingLookback
        ))
    ));
    assert_eq!(publisher.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn publisher_start_failure_still_stops_publisher() {
    let publisher = Arc::new(RecordingPublisher {
        fail_start: true,
        ..RecordingPublisher::default()
    });
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(2), 2),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    assert!(matches!(
        pipeline.on_startup().await,
        Err(PipelineError::PublisherStart(PublishError::Io { .. }))
    ));
    assert_eq!(publisher.stops(), 1);
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.state(), PipelineState::Created);
}

#[tokio::test]
async fn status_follows_lifecycle() {
    let publisher = Arc::new(RecordingPublisher {
        gate: Some(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        }),
        ..RecordingPublisher::default()
    });
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(1), 1),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );
    let status = pipeline.status();
    assert_eq!(status.state(), PipelineState::Created);

    pipeline.on_startup().await.unwrap();
    assert!(status.is_running());

    publisher.gate.as_ref().unwrap().release.notify_one();
    pipeline.on_shutdown().await.unwrap();
    assert_eq!(status.state(), PipelineState::Stopped);

    // Repeated shutdown is a no-op and does not stop the publisher again.
    assert!(pipeline.on_shutdown().await.unwrap().is_none());
    assert_eq!(publisher.stops(), 1);
}

#[tokio::test]
async fn bounded_shutdown_aborts_stuck_publish_and_stops_publisher() {
    // Gate is never released, so the first publish never returns.
    let publisher = Arc::new(RecordingPublisher {
        gate: Some(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        }),
        ..RecordingPublisher::default()
    });
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(3), 3),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    pipeline.on_startup().await.unwrap();
    tokio::time::timeout(WAIT, publisher.gate.as_ref().unwrap().entered.notified())
        .await
        .expect("first publish should start");

    let limit = Duration::from_millis(200);
    let err = tokio::time::timeout(WAIT, pipeline.on_shutdown_within(limit))
        .await
        .expect("bounded shutdown should return")
        .unwrap_err();

    assert!(matches!(err, PipelineError::DrainTimeout { waited } if waited == limit));
    assert!(publisher.keys().is_empty());
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.stops(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    assert!(pipeline.on_shutdown().await.unwrap().is_none());
    assert_eq!(publisher.stops(), 1);
}

#[tokio::test]
async fn bounded_shutdown_within_limit_drains_normally() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(2), 2),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    pipeline.on_startup().await.unwrap();
    tokio::time::timeout(WAIT, pipeline.finished())
        .await
        .expect("ingestion loop should finish");

    let report = pipeline
        .on_shutdown_within(Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, LoopExit::Exhausted);
    assert_eq!(report.records_published, 2);
    assert_eq!(publisher.stops(), 1);
}

// =============================================================================
// Real Publishers
// =============================================================================

/// Forwards to a JSON-lines publisher, then stalls forever on the publish
/// after `accept`.
struct StallingJsonLines {
    inner: JsonLinesPublisher,
    accept: usize,
    published: AtomicUsize,
}

#[async_trait]
impl Publisher for StallingJsonLines {
    async fn start(&self) -> Result<(), PublishError> {
        self.inner.start().await
    }

    async fn publish(&self, key: &str, record: &CanonicalTrade) -> Result<(), PublishError> {
        if self.published.load(Ordering::SeqCst) >= self.accept {
            std::future::pending::<()>().await;
        }
        self.inner.publish(key, record).await?;
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PublishError> {
        self.inner.stop().await
    }
}

#[tokio::test]
async fn jsonl_lines_accepted_before_drain_timeout_are_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trades.jsonl");
    let publisher = Arc::new(StallingJsonLines {
        inner: JsonLinesPublisher::new("trades", &path),
        accept: 2,
        published: AtomicUsize::new(0),
    });

    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(5), 5),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );
    pipeline.on_startup().await.unwrap();

    tokio::time::timeout(WAIT, async {
        while publisher.published.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("two records should be accepted");

    let err = pipeline
        .on_shutdown_within(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DrainTimeout { .. }));

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["value"]["timestamp"], "2023-09-25T07:49:02.000000");
}

#[tokio::test]
async fn broadcast_subscribers_receive_generated_trades() {
    let publisher = Arc::new(BroadcastPublisher::new("trades", 1024));
    // Attached before startup; the lifecycle owns `start`.
    let mut rx = publisher.subscribe().unwrap();

    let mut options = SourceOptions::default();
    options.synthetic.trades_per_pair = 3;
    options.synthetic.batch_size = 4;
    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD", "ETH/EUR"]),
        SourceSelector::new(options),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    let report = run_to_completion(&mut pipeline).await.unwrap().unwrap();
    assert_eq!(report.records_published, 6);

    let mut keys = Vec::new();
    let mut last_millis = i64::MIN;
    while let Ok(message) = rx.try_recv() {
        let trade = message.decode_value().unwrap();
        assert!(trade.event_time_millis() > last_millis);
        last_millis = trade.event_time_millis();
        keys.push(message.key);
    }
    assert_eq!(
        keys,
        vec!["BTC-USD", "ETH-EUR", "BTC-USD", "ETH-EUR", "BTC-USD", "ETH-EUR"]
    );
}

#[tokio::test]
async fn jsonl_publisher_receives_whole_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trades.jsonl");
    let publisher: Arc<dyn Publisher> = Arc::new(JsonLinesPublisher::new("trades", &path));

    let mut pipeline = PipelineLifecycle::new(
        config("synthetic", &["BTC/USD"]),
        fixture_selector(numbered_trades(4), 3),
        publisher,
    );
    run_to_completion(&mut pipeline).await.unwrap();

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|l| l["key"] == "BTC-USD" && l["topic"] == "trades"));
    assert_eq!(lines[3]["value"]["timestamp"], "2023-09-25T07:49:04.000000");
}
