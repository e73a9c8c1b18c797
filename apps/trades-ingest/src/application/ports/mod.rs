//! Application Ports (Driven)
//!
//! Interfaces the ingestion pipeline depends on. Infrastructure adapters
//! implement these; the pipeline never names a concrete adapter.
//!
//! - `TradeSource`: produces ordered batches of canonical trades
//! - `Publisher`: sends one canonical trade as a keyed bus message

mod publisher_port;
mod source_port;

pub use publisher_port::{PublishError, Publisher};
pub use source_port::{ConfigurationError, SourceError, SourceKind, TradeSource};
