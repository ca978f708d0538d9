//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0 except `idle_secs`, where 0 turns
//!   keep-alive pings off; limits > 0)
//! - Check addresses and TLS paths are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    } else if !config.listener.bind_address.contains(':') {
        errors.push(ValidationError::new("listener.bind_address", "expected host:port"));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
        if tls.alpn.iter().any(|p| p.is_empty()) {
            errors.push(ValidationError::new("listener.tls.alpn", "protocol names must not be empty"));
        }
    }

    let timeouts = [
        ("timeouts.read_header_secs", config.timeouts.read_header_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.graceful_secs", config.timeouts.graceful_secs),
    ];
    for (field, secs) in timeouts {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be greater than 0"));
    }

    if let Some(cors) = &config.cors {
        if cors.allow_origins.iter().any(|o| o.is_empty()) {
            errors.push(ValidationError::new("cors.allow_origins", "origins must not be empty"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
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
    use crate::lifecycle::LiveSettings;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = String::new();
        config.listener.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
            alpn: Vec::new(),
        });
        config.timeouts.request_secs = 0;
        config.timeouts.graceful_secs = 0;
        config.limits.max_header_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.tls.cert_path",
                "timeouts.request_secs",
                "timeouts.graceful_secs",
                "limits.max_header_bytes",
            ]
        );
    }

    #[test]
    fn zero_idle_timeout_disables_keep_alive() {
        let mut config = ServerConfig::default();
        config.timeouts.idle_secs = 0;
        assert!(validate_config(&config).is_ok());

        let live = config.live_settings(&LiveSettings::default());
        assert!(live.idle_timeout.is_zero());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
