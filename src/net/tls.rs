//! TLS configuration and certificate loading.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;

/// ALPN protocols advertised when none are configured.
pub fn default_alpn() -> Vec<Vec<u8>> {
    vec![b"h2".to_vec(), b"http/1.1".to_vec()]
}

/// Where an attempt gets its certificate material.
#[derive(Clone)]
pub enum TlsSource {
    /// PEM files read when each attempt binds.
    PemFiles { cert_path: PathBuf, key_path: PathBuf },
    /// Material already in memory, shared by every attempt.
    Loaded(RustlsConfig),
}

impl fmt::Debug for TlsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsSource::PemFiles { cert_path, key_path } => f
                .debug_struct("PemFiles")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
            TlsSource::Loaded(_) => f.write_str("Loaded"),
        }
    }
}

/// TLS settings for a snapshot.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub source: TlsSource,

    /// Protocols offered during ALPN negotiation. Ignored for
    /// [`TlsSource::Loaded`], which carries its own.
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl TlsSettings {
    pub fn from_pem_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            source: TlsSource::PemFiles {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            },
            alpn_protocols: default_alpn(),
        }
    }

    pub fn from_rustls(config: RustlsConfig) -> Self {
        Self {
            source: TlsSource::Loaded(config),
            alpn_protocols: default_alpn(),
        }
    }

    pub fn with_alpn(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Settings for the attempt after a restart.
    pub(crate) fn reissue(&self) -> Self {
        let source = match &self.source {
            TlsSource::Loaded(config) => TlsSource::Loaded(config.clone()),
            TlsSource::PemFiles { cert_path, key_path } => TlsSource::PemFiles {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            },
        };
        Self {
            source,
            alpn_protocols: self.alpn_protocols.clone(),
        }
    }

    /// Produce the acceptor configuration for a new attempt.
    ///
    /// PEM files are read on the blocking pool.
    pub async fn load(&self) -> io::Result<RustlsConfig> {
        match &self.source {
            TlsSource::Loaded(config) => Ok(config.clone()),
            TlsSource::PemFiles { cert_path, key_path } => {
                let (cert, key) = (cert_path.clone(), key_path.clone());
                let alpn = self.alpn_protocols.clone();
                let config = tokio::task::spawn_blocking(move || load_server_config(&cert, &key, &alpn))
                    .await
                    .map_err(io::Error::other)??;
                tracing::debug!(cert = ?cert_path, key = ?key_path, "TLS certificates loaded");
                Ok(RustlsConfig::from_config(Arc::new(config)))
            }
        }
    }
}

/// Build a rustls server configuration from PEM certificate and key files.
pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
    alpn_protocols: &[Vec<u8>],
) -> io::Result<rustls::ServerConfig> {
    if !cert_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("No certificates in {:?}", cert_path),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("No private key in {:?}", key_path),
            )
        })?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    config.alpn_protocols = alpn_protocols.to_vec();

    Ok(config)
}
