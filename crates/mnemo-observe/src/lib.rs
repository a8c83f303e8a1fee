//! Observability setup for mnemo: tracing subscriber initialization with
//! optional OpenTelemetry span export.

pub mod tracing_setup;
