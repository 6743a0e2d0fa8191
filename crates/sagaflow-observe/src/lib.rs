//! Observability setup for sagaflow binaries.

pub mod tracing_setup;
