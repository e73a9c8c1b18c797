//! Trades Ingest Binary
//!
//! Runs the trade pipeline with its status endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trades-ingest
//! ```
//!
//! # Environment Variables
//!
//! - `TRADES_SOURCE`: live | historical | synthetic (default: live)
//! - `TRADES_PAIRS`: Comma-separated pairs (default: BTC/USD)
//! - `TRADES_LOOKBACK_DAYS`: Lookback window, required for historical
//! - `TRADES_HTTP_PORT`: Status endpoint port (default: 8000)
//! - `BUS_KIND`: broadcast | jsonl (default: broadcast)
//! - `BUS_TOPIC`: Topic name (default: trades)
//! - `BUS_JSONL_PATH`: Output file for the jsonl bus (default: trades.jsonl)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use trades_ingest::infrastructure::telemetry;
use trades_ingest::{
    HealthServer, IngestConfig, PipelineLifecycle, SourceOptions, SourceSelector, build_publisher,
    init_metrics,
};

/// Upper bound on draining the pipeline after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting trades ingest");

    let _metrics_handle = init_metrics();

    match run().await {
        Ok(()) => {
            tracing::info!("Trades ingest stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = ?e, "Trades ingest failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = IngestConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let selector = SourceSelector::new(SourceOptions::from_config(&config));
    let publisher = build_publisher(&config.bus);
    let mut pipeline = PipelineLifecycle::new(config.pipeline_config(), selector, publisher);

    pipeline
        .on_startup()
        .await
        .context("pipeline failed to start")?;

    let health_cancel = CancellationToken::new();
    let health_server = HealthServer::new(
        config.server.http_port,
        pipeline.status(),
        health_cancel.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Status server error");
        }
    });

    tokio::select! {
        () = await_shutdown() => {}
        () = pipeline.finished() => {
            tracing::info!("Ingestion loop exited on its own");
        }
    }

    let outcome = pipeline.on_shutdown_within(SHUTDOWN_TIMEOUT).await;
    health_cancel.cancel();

    if let Some(report) = outcome.context("pipeline stopped with an error")? {
        tracing::info!(
            batches = report.batches_polled,
            published = report.records_published,
            exit = ?report.exit,
            "Pipeline drained"
        );
    }
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        source = %config.source.kind,
        pairs = ?config.source.pairs,
        lookback_secs = config.source.lookback.map(|l| l.as_secs()),
        bus = config.bus.kind.as_str(),
        topic = %config.bus.topic,
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.kraken.ws_url,
        rest_url = %config.kraken.rest_url,
        "Kraken endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
