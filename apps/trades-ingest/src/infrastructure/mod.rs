//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete trade sources, bus publishers, configuration loading and the
//! operational surface.

/// Trade source adapters and the source selector.
pub mod sources;

/// Publisher adapters for the message bus.
pub mod bus;

/// Environment configuration.
pub mod config;

/// Status, liveness and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
