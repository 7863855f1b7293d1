//! Prometheus metrics for the ManagedSeed operator
//!
//! Exposes reconciliation counters per controller plus health and readiness
//! endpoints.

pub mod prometheus;

pub use prometheus::*;
