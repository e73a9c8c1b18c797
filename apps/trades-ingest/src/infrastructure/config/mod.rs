//! Configuration Module
//!
//! Environment-driven configuration for the ingestion service.

mod settings;

pub use settings::{
    BusKind, BusSettings, ConfigError, IngestConfig, KrakenSettings, ServerSettings,
    SourceSettings, SyntheticSettings,
};
