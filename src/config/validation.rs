//! Configuration validation logic.

use std::net::SocketAddr;

use crate::config::schema::Config;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a Config for semantic correctness.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.api.disabled {
        if config.api.listen_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError(format!(
                "api.listen_address '{}' is not a valid socket address",
                config.api.listen_address
            )));
        }

        if let Some(tls) = &config.api.tls {
            for (field, value) in [
                ("ca_path", &tls.ca_path),
                ("cert_path", &tls.cert_path),
                ("key_path", &tls.key_path),
            ] {
                if value.is_empty() {
                    errors.push(ValidationError(format!("api.tls.{field} must not be empty")));
                }
            }
        }

        if !config.api.health_endpoint.is_empty()
            && !config.api.health_endpoint.starts_with('/')
        {
            errors.push(ValidationError(
                "api.health_endpoint must start with '/'".to_string(),
            ));
        }
    }

    if !config.push.disabled && config.push.topic.is_empty() {
        errors.push(ValidationError("push.topic must not be empty".to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn bad_listen_address_is_reported() {
        let mut config = Config::default();
        config.api.listen_address = "nowhere".to_string();

        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("not a valid socket address"));
    }

    #[test]
    fn partial_tls_triple_is_reported() {
        let mut config = Config::default();
        config.api.tls = Some(TlsConfig {
            ca_path: "ca.pem".to_string(),
            cert_path: String::new(),
            key_path: "server.key".to_string(),
        });

        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("api.tls.cert_path"));
    }

    #[test]
    fn enabled_push_requires_a_topic() {
        let mut config = Config::default();
        config.push.topic = String::new();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("push.topic"));

        config.push.disabled = true;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn disabled_api_skips_listener_checks() {
        let mut config = Config::default();
        config.api.disabled = true;
        config.api.listen_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
