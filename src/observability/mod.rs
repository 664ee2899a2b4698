//! Observability subsystem.
//!
//! Structured logging goes through `tracing` and is initialized by the
//! embedder; this module only owns metric recording.

pub mod metrics;
