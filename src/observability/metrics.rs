//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_lifecycle_serve_attempts_total` (counter): serve attempts by mode
//! - `http_lifecycle_restarts_total` (counter): completed restart transitions
//! - `http_lifecycle_drains_total` (counter): graceful drains started
//! - `http_lifecycle_serving` (gauge): 1 while an attempt is serving
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so the library
//!   never requires one
//! - Prometheus exposition over its own listener, separate from the served router

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_attempt(mode: &'static str) {
    counter!("http_lifecycle_serve_attempts_total", "mode" => mode).increment(1);
}

pub fn record_restart() {
    counter!("http_lifecycle_restarts_total").increment(1);
}

pub fn record_drain() {
    counter!("http_lifecycle_drains_total").increment(1);
}

pub fn set_serving(serving: bool) {
    gauge!("http_lifecycle_serving").set(if serving { 1.0 } else { 0.0 });
}
