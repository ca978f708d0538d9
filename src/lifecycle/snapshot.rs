//! Server configuration split by when a change takes effect.
//!
//! # Responsibilities
//! - `ConfigSnapshot`: fields that only apply when a serve attempt begins
//!   (bind address, TLS, connection hooks, handler). Immutable once shared;
//!   a restart swaps in a rebuilt copy.
//! - `LiveSettings`: fields read on every request (timeouts, header limit,
//!   error sink). Swapped atomically, never require a restart.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Extensions;
use axum::Router;

use crate::http::limits::{ErrorSink, LogErrorSink};
use crate::net::connection::{ConnState, ConnectionId};
use crate::net::tls::TlsSettings;

/// Observer for connection state transitions.
pub type ConnStateHook = Arc<dyn Fn(ConnectionId, ConnState) + Send + Sync>;

/// Produces the extensions every request of an attempt starts with.
pub type BaseContextHook = Arc<dyn Fn() -> Extensions + Send + Sync>;

/// Adds per-connection extensions, given the peer address.
pub type ConnContextHook = Arc<dyn Fn(SocketAddr, &mut Extensions) + Send + Sync>;

/// Restart-required server configuration for one serve attempt.
#[derive(Clone)]
pub struct ConfigSnapshot {
    /// Address to bind, `host:port`.
    pub bind_address: String,

    /// Handler for every request.
    pub router: Router,

    /// TLS material. `None` serves plaintext HTTP.
    pub tls: Option<TlsSettings>,

    pub conn_state: Option<ConnStateHook>,

    pub base_context: Option<BaseContextHook>,

    pub conn_context: Option<ConnContextHook>,

    generation: u64,
}

impl ConfigSnapshot {
    /// Create a plaintext snapshot serving `router` on `bind_address`.
    pub fn new(bind_address: impl Into<String>, router: Router) -> Self {
        Self {
            bind_address: bind_address.into(),
            router,
            tls: None,
            conn_state: None,
            base_context: None,
            conn_context: None,
            generation: 0,
        }
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_conn_state<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId, ConnState) + Send + Sync + 'static,
    {
        self.conn_state = Some(Arc::new(hook));
        self
    }

    pub fn with_base_context<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Extensions + Send + Sync + 'static,
    {
        self.base_context = Some(Arc::new(hook));
        self
    }

    pub fn with_conn_context<F>(mut self, hook: F) -> Self
    where
        F: Fn(SocketAddr, &mut Extensions) + Send + Sync + 'static,
    {
        self.conn_context = Some(Arc::new(hook));
        self
    }

    /// Number of restarts this snapshot descends from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the next attempt built from this snapshot serves HTTPS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Derive the snapshot for the attempt that follows a restart.
    ///
    /// Loaded certificate material is shared with the new snapshot; file
    /// backed material is read again when the next attempt binds.
    pub(crate) fn rebuild(&self) -> Self {
        Self {
            bind_address: self.bind_address.clone(),
            router: self.router.clone(),
            tls: self.tls.as_ref().map(TlsSettings::reissue),
            conn_state: self.conn_state.clone(),
            base_context: self.base_context.clone(),
            conn_context: self.conn_context.clone(),
            generation: self.generation + 1,
        }
    }
}

impl fmt::Debug for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSnapshot")
            .field("bind_address", &self.bind_address)
            .field("tls", &self.tls)
            .field("conn_state", &self.conn_state.is_some())
            .field("base_context", &self.base_context.is_some())
            .field("conn_context", &self.conn_context.is_some())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Settings read fresh by every request.
#[derive(Clone)]
pub struct LiveSettings {
    /// Time allowed to receive request headers on a new connection.
    pub read_header_timeout: Duration,

    /// Time allowed for the handler to produce a response.
    pub request_timeout: Duration,

    /// Keep-alive interval for idle HTTP/2 connections. Zero disables it.
    pub idle_timeout: Duration,

    /// Upper bound on request line plus header bytes.
    pub max_header_bytes: usize,

    /// Destination for per-request failures.
    pub error_sink: Arc<dyn ErrorSink>,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            read_header_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_header_bytes: 1 << 20,
            error_sink: Arc::new(LogErrorSink),
        }
    }
}

impl fmt::Debug for LiveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSettings")
            .field("read_header_timeout", &self.read_header_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .finish_non_exhaustive()
    }
}
