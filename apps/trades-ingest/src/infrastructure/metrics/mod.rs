//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Polling**: batches pulled per source kind
//! - **Publishing**: trades published per pair, publish latency
//! - **Errors**: source and publish failures
//! - **Lifecycle**: current pipeline state
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::SourceKind;
use crate::application::services::PipelineState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "trades_ingest_batches_polled_total",
        "Total batches pulled from the trade source"
    );
    describe_counter!(
        "trades_ingest_records_polled_total",
        "Total trade records pulled from the trade source"
    );
    describe_counter!(
        "trades_ingest_trades_published_total",
        "Total trades accepted by the publisher"
    );
    describe_counter!(
        "trades_ingest_publish_errors_total",
        "Total publish failures"
    );
    describe_counter!(
        "trades_ingest_source_errors_total",
        "Total trade source failures"
    );
    describe_histogram!(
        "trades_ingest_publish_seconds",
        "Time for the publisher to accept one trade"
    );
    describe_gauge!(
        "trades_ingest_pipeline_state",
        "Pipeline state (0 created, 1 running, 2 cancelling, 3 stopped)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one batch pulled from a source.
pub fn record_batch_polled(source: SourceKind, records: usize) {
    counter!(
        "trades_ingest_batches_polled_total",
        "source" => source.as_str()
    )
    .increment(1);
    counter!(
        "trades_ingest_records_polled_total",
        "source" => source.as_str()
    )
    .increment(records as u64);
}

/// Record a trade accepted by the publisher.
pub fn record_trade_published(pair: &str, duration: Duration) {
    counter!(
        "trades_ingest_trades_published_total",
        "pair" => pair.to_string()
    )
    .increment(1);
    histogram!("trades_ingest_publish_seconds").record(duration.as_secs_f64());
}

/// Record a publish failure.
pub fn record_publish_error() {
    counter!("trades_ingest_publish_errors_total").increment(1);
}

/// Record a source failure.
pub fn record_source_error(source: SourceKind) {
    counter!(
        "trades_ingest_source_errors_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Update the pipeline state gauge.
pub fn set_pipeline_state(state: PipelineState) {
    gauge!("trades_ingest_pipeline_state").set(state_value(state));
}

const fn state_value(state: PipelineState) -> f64 {
    match state {
        PipelineState::Created => 0.0,
        PipelineState::Running => 1.0,
        PipelineState::Cancelling => 2.0,
        PipelineState::Stopped => 3.0,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_values_are_ordered() {
        assert!(state_value(PipelineState::Created) < state_value(PipelineState::Running));
        assert!(state_value(PipelineState::Running) < state_value(PipelineState::Cancelling));
        assert!(state_value(PipelineState::Cancelling) < state_value(PipelineState::Stopped));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_batch_polled(SourceKind::Synthetic, 3);
        record_trade_published("BTC/USD", Duration::from_millis(2));
        record_publish_error();
        record_source_error(SourceKind::Live);
        set_pipeline_state(PipelineState::Running);
    }
}
