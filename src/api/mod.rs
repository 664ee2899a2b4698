//! HTTP entrypoint.

pub mod server;

pub use server::HealthCheck;
