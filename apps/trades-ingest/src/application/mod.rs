//! Application Layer - Port definitions and the ingestion pipeline.
//!
//! This layer owns the contracts that trade sources and publishers implement,
//! and the services that drive them.

/// Port interfaces for trade sources and bus publishers.
pub mod ports;

/// Ingestion loop and pipeline lifecycle orchestration.
pub mod services;
