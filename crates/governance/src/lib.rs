#![deny(unused)]
//! Observability for Code Runner.
//!
//! This crate provides:
//! - Structured logging and distributed tracing
//! - Prometheus metrics for executions, builds, runs and HTTP requests

pub mod metrics;
pub mod tracing_layer;

pub use self::metrics::{
    setup_metrics_recorder, track_build, track_charge, track_execution, track_request, track_run,
    ExecutionOutcomeKind,
};
pub use tracing_layer::configure_tracing;
