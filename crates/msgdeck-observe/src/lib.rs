//! Observability setup for msgdeck: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
