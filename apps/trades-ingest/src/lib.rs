#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Trades Ingest - Trade Source to Message Bus Pipeline
//!
//! Pulls trades from a pluggable source, normalizes them into one canonical
//! record shape and republishes each record onto a bus topic keyed by
//! trading pair.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical trade record
//!   - `trade`: `CanonicalTrade`, `Pair`, timestamp normalization
//!
//! - **Application**: Ports and the pipeline
//!   - `ports`: `TradeSource` and `Publisher` contracts
//!   - `services`: `IngestionLoop` and `PipelineLifecycle`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `sources`: Kraken live/historical feeds, synthetic fixture, selector
//!   - `bus`: broadcast and JSON-lines publishers
//!   - `config`: environment configuration
//!   - `health`: status endpoint
//!
//! # Data Flow
//!
//! ```text
//! SourceSelector ──► TradeSource ──► IngestionLoop ──► Publisher ──► topic
//!                                         ▲
//!                        PipelineLifecycle ┘ (start, cancel, stop)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical trade types with no I/O.
pub mod domain;

/// Application layer - Ports and pipeline services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::trade::{CanonicalTrade, Pair, RawTrade, TradeError};

// Ports
pub use application::ports::{
    ConfigurationError, PublishError, Publisher, SourceError, SourceKind, TradeSource,
};

// Pipeline
pub use application::services::{
    IngestError, IngestionContext, IngestionLoop, IngestionReport, IngestionSettings, LoopExit,
    LoopState, PipelineConfig, PipelineError, PipelineLifecycle, PipelineState, PipelineStatus,
};

// Sources
pub use infrastructure::sources::{SourceOptions, SourceSelector, SyntheticSource};

// Bus
pub use infrastructure::bus::{BroadcastPublisher, BusMessage, JsonLinesPublisher, build_publisher};

// Config
pub use infrastructure::config::{BusKind, ConfigError, IngestConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
