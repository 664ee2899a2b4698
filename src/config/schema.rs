//! Configuration schema definitions.
//!
//! This module defines the serializable configuration of the two
//! subsystems. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// API (HTTP + WebSocket) subsystem.
    pub api: ApiConfig,

    /// Push (event fan-out) subsystem.
    pub push: PushConfig,
}

/// TLS material for a listener; all three paths are required together.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the CA bundle (PEM).
    pub ca_path: String,

    /// Path to the certificate file (PEM).
    pub cert_path: String,

    /// Path to the private key file (PEM).
    pub key_path: String,
}

/// API subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Disable the whole subsystem.
    pub disabled: bool,

    /// Bind address (e.g. "0.0.0.0:8080").
    pub listen_address: String,

    /// Optional TLS configuration; present ⇒ the listener serves TLS.
    pub tls: Option<TlsConfig>,

    /// Enable the profiling endpoint (wired by the embedder).
    pub enable_profiling: bool,

    /// Profiling endpoint bind address.
    pub profiling_listen_address: String,

    /// Health endpoint path; empty disables it.
    pub health_endpoint: String,

    /// Enable permissive CORS handling.
    pub enable_cors: bool,

    /// Refuse write operations with 423 Locked.
    pub read_only: bool,

    /// Identity names exempted from read-only mode.
    pub read_only_excluded: Vec<String>,

    /// Maximum in-flight requests; 0 means unlimited.
    pub max_concurrent_requests: usize,

    /// Let dispatcher panics propagate instead of shaping 500s.
    pub disable_panic_recovery: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            listen_address: "0.0.0.0:8080".to_string(),
            tls: None,
            enable_profiling: false,
            profiling_listen_address: "127.0.0.1:6060".to_string(),
            health_endpoint: String::new(),
            enable_cors: false,
            read_only: false,
            read_only_excluded: Vec::new(),
            max_concurrent_requests: 0,
            disable_panic_recovery: false,
        }
    }
}

/// Push subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PushConfig {
    /// Disable the whole subsystem.
    pub disabled: bool,

    /// Bus URL handed to whatever adapter the embedder wires in.
    pub url: String,

    /// Bus cluster identifier.
    pub cluster_id: String,

    /// This instance's client identifier on the bus.
    pub client_id: String,

    /// Topic events travel on.
    pub topic: String,

    /// Queue group for at-most-once consumption per group; empty for plain
    /// subscriptions.
    pub queue_group: String,

    /// Optional TLS material for the bus connection.
    pub tls: Option<TlsConfig>,

    /// Identity names whose events may be published; empty means all.
    pub publishable_identities: Vec<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            url: String::new(),
            cluster_id: "test-cluster".to_string(),
            client_id: String::new(),
            topic: "events".to_string(),
            queue_group: String::new(),
            tls: None,
            publishable_identities: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!config.api.disabled);
        assert_eq!(config.api.listen_address, "0.0.0.0:8080");
        assert_eq!(config.push.topic, "events");
        assert!(config.push.publishable_identities.is_empty());
    }

    #[test]
    fn partial_config_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            listen_address = "127.0.0.1:9000"
            read_only = true
            read_only_excluded = ["user"]

            [push]
            topic = "changes"
            queue_group = "workers"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.listen_address, "127.0.0.1:9000");
        assert!(config.api.read_only);
        assert_eq!(config.api.read_only_excluded, ["user"]);
        assert_eq!(config.push.topic, "changes");
        assert_eq!(config.push.queue_group, "workers");
    }
}
