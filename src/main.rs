//! HTTP lifecycle server.
//!
//! # Architecture Overview
//!
//! ```text
//!   config file ──▶ ConfigWatcher ──▶ live fields ──▶ LiveSettings (next request)
//!                                  └─▶ restart fields ──▶ ConfigSnapshot + restart()
//!
//!   SIGINT / SIGTERM ──▶ drain ──▶ start() returns
//!
//!   Client ──▶ listener ──▶ [TLS] ──▶ limits ──▶ panic catcher ──▶ timer ──▶ dump ──▶ [CORS] ──▶ handler
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use serde_json::json;
use tokio::sync::mpsc;

use http_lifecycle::codec::JsonCodec;
use http_lifecycle::config::{load_config, ConfigWatcher, ServerConfig};
use http_lifecycle::http::{with_cors, with_standard_layers, Formatter};
use http_lifecycle::lifecycle::{ConfigSnapshot, LiveSettings, ServerController};
use http_lifecycle::observability::logging::{fatal, init_logging};
use http_lifecycle::observability::metrics::init_metrics;
use http_lifecycle::observability::LogLevel;

#[derive(Debug, Parser)]
#[command(version, about = "HTTP server with graceful drain and in-place restart")]
struct Args {
    /// TOML configuration file, watched for changes.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `logging.level`.
    #[arg(long)]
    log_level: Option<LogLevel>,
}

impl Args {
    /// Command-line values win over the file, on every reload.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

type Json = Formatter<JsonCodec>;

async fn health(State(formatter): State<Json>) -> Response {
    formatter.respond(StatusCode::OK, Some(&json!({ "status": "ok" })))
}

async fn echo(State(formatter): State<Json>, body: Bytes) -> Response {
    match formatter.decode::<serde_json::Value>(&body) {
        Ok(value) => formatter.respond(StatusCode::OK, Some(&value)),
        Err(e) => formatter.respond(StatusCode::BAD_REQUEST, Some(&json!({ "error": e.to_string() }))),
    }
}

fn build_router(config: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/echo", post(echo))
        .with_state(Formatter::new(JsonCodec));

    let router = match &config.cors {
        Some(cors) => with_cors(router, cors.clone()),
        None => router,
    };

    with_standard_layers(router, LogLevel::Debug)
}

fn build_snapshot(config: &ServerConfig) -> ConfigSnapshot {
    let snapshot = ConfigSnapshot::new(config.listener.bind_address.clone(), build_router(config));
    match config.tls_settings() {
        Some(tls) => snapshot.with_tls(tls),
        None => snapshot,
    }
}

/// Apply reloaded configs to the running controller.
async fn apply_updates(
    controller: Arc<ServerController>,
    args: Arc<Args>,
    mut current: ServerConfig,
    mut updates: mpsc::UnboundedReceiver<ServerConfig>,
) {
    while let Some(mut next) = updates.recv().await {
        args.apply(&mut next);
        if next == current {
            continue;
        }

        controller.update_live(|live| next.apply_live(live));
        tracing::info!(
            request_timeout_secs = next.timeouts.request_secs,
            max_header_bytes = next.limits.max_header_bytes,
            "Live settings updated"
        );

        if next.graceful_timeout() != current.graceful_timeout() {
            tracing::warn!("timeouts.graceful_secs changes apply after a process restart");
        }
        if next.logging != current.logging || next.observability != current.observability {
            tracing::warn!("logging and observability changes apply after a process restart");
        }

        if current.requires_restart(&next) {
            let staged = build_snapshot(&next);
            controller.update_config(|snapshot| {
                snapshot.bind_address = staged.bind_address.clone();
                snapshot.router = staged.router.clone();
                snapshot.tls = staged.tls.clone();
            });
            controller.restart();
        }

        current = next;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Arc::new(Args::parse());

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    args.apply(&mut config);

    init_logging(&config.logging)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-lifecycle starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    fatal(format_args!("Failed to start metrics exporter: {e}"));
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let live = config.live_settings(&LiveSettings::default());
    let controller = Arc::new(
        ServerController::new(build_snapshot(&config), live).graceful_timeout(config.graceful_timeout()),
    );

    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let guard = watcher.run()?;
            tokio::spawn(apply_updates(controller.clone(), args.clone(), config.clone(), updates));
            Some(guard)
        }
        None => None,
    };

    controller.start().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
