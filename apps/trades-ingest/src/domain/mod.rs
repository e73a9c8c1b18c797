//! Domain Layer - Canonical trade types.
//!
//! Pure types with no I/O. Every trade source normalizes into these before
//! anything is published.

/// Canonical trade record and its construction rules.
pub mod trade;
