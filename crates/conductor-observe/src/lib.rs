//! Observability setup for Conductor: tracing subscriber with text or JSON
//! output and optional OpenTelemetry span export.

pub mod tracing_setup;
