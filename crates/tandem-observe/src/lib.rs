//! Observability setup for the tandem workflow engine.
//!
//! Structured logging via `tracing` with an optional OpenTelemetry bridge.

pub mod tracing_setup;
