//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::routing::get;
use axum::{Extension, Router};
use http_lifecycle::observability::logging::build_dispatch;
use http_lifecycle::observability::{LogFormat, LogLevel, LoggingConfig};
use http_lifecycle::ServerController;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;

/// Request context inserted by the base-context hook.
#[derive(Debug, Clone)]
pub struct Tenant(pub &'static str);

/// In-memory log sink.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }

    /// Dispatcher writing debug-level text into this capture.
    pub fn dispatch(&self) -> Dispatch {
        build_dispatch(
            &LoggingConfig {
                level: LogLevel::Debug,
                format: LogFormat::Text,
            },
            self.clone(),
        )
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn test_router() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "slow"
            }),
        )
        .route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "hang"
            }),
        )
        .route("/tenant", get(|Extension(tenant): Extension<Tenant>| async move { tenant.0 }))
        .route(
            "/peer",
            get(|ConnectInfo(peer): ConnectInfo<SocketAddr>| async move { peer.to_string() }),
        )
}

/// HTTP client that opens a fresh connection per request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// HTTPS client that trusts the self-signed fixture certificate.
pub fn tls_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Paths of the self-signed `localhost` certificate and key under `tests/fixtures`.
pub fn fixture_pem() -> (PathBuf, PathBuf) {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures");
    (dir.join("localhost.crt"), dir.join("localhost.key"))
}

/// Wait for the attempt built from snapshot `generation` to be bound.
pub async fn wait_until_serving(controller: &ServerController, generation: u64) -> SocketAddr {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if controller.snapshot().generation() == generation {
                if let Some(addr) = controller.local_addr() {
                    return addr;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server did not start serving in time")
}
