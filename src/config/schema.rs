//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.
//! Fields split into two groups: restart-required (listener, CORS) and
//! live (timeouts except graceful, limits).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::cors::CorsOptions;
use crate::lifecycle::snapshot::LiveSettings;
use crate::net::tls::TlsSettings;
use crate::observability::LoggingConfig;

/// Root configuration for the server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    pub logging: LoggingConfig,

    /// CORS policy. Absent means no CORS headers are added.
    pub cors: Option<CorsOptions>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// ALPN protocols, most preferred first. Defaults to h2 then http/1.1.
    #[serde(default)]
    pub alpn: Vec<String>,
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to receive request headers.
    pub read_header_secs: u64,

    /// Time allowed for the handler to respond.
    pub request_secs: u64,

    /// Keep-alive interval for idle connections. 0 disables keep-alive pings.
    pub idle_secs: u64,

    /// Upper bound on a graceful drain. Fixed at startup.
    pub graceful_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_header_secs: 10,
            request_secs: 30,
            idle_secs: 60,
            graceful_secs: 15,
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum bytes of request line plus headers.
    pub max_header_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 1 << 20,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ServerConfig {
    /// Whether moving from `self` to `next` needs the listener cycled.
    pub fn requires_restart(&self, next: &ServerConfig) -> bool {
        self.listener != next.listener || self.cors != next.cors
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.graceful_secs)
    }

    pub fn tls_settings(&self) -> Option<TlsSettings> {
        self.listener.tls.as_ref().map(|tls| {
            let settings = TlsSettings::from_pem_files(&tls.cert_path, &tls.key_path);
            if tls.alpn.is_empty() {
                settings
            } else {
                settings.with_alpn(tls.alpn.iter().map(|p| p.as_bytes().to_vec()).collect())
            }
        })
    }

    /// Live settings described by this config, keeping `base`'s error sink.
    pub fn live_settings(&self, base: &LiveSettings) -> LiveSettings {
        let mut live = base.clone();
        self.apply_live(&mut live);
        live
    }

    /// Overwrite the live fields of `live` with this config's values.
    pub fn apply_live(&self, live: &mut LiveSettings) {
        live.read_header_timeout = Duration::from_secs(self.timeouts.read_header_secs);
        live.request_timeout = Duration::from_secs(self.timeouts.request_secs);
        live.idle_timeout = Duration::from_secs(self.timeouts.idle_secs);
        live.max_header_bytes = self.limits.max_header_bytes;
    }
}
