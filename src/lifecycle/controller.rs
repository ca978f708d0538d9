//! Serve / drain / restart state machine.
//!
//! # States
//! ```text
//! Idle ──start()──▶ Serving ──signal | restart() | shutdown()──▶ Draining
//!                      ▲                                            │
//!                      │                                  serve returned
//!                      │                                            ▼
//!                      └──── Restarting ◀── restart pending ── (decide) ── otherwise ──▶ Stopped
//! ```
//!
//! # Design Decisions
//! - Each attempt owns its drain handle and trigger; nothing leaks across attempts
//! - The restart flag is consulted only after an attempt returned
//! - Only `restart_requested` is flipped from outside `start`
//! - `restart_requested` is cleared at the top of every attempt

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;
use uuid::Uuid;

use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};
use crate::lifecycle::signals::SignalWatcher;
use crate::lifecycle::snapshot::{ConfigSnapshot, LiveSettings};
use crate::net::connection::ConnStateAcceptor;
use crate::net::listener::bind_listener;
use crate::net::service::AttemptService;
use crate::observability::metrics;

/// Default bound on graceful draining.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(15);

/// Error returned by [`ServerController::start`].
#[derive(Debug, Error)]
pub enum ServeError {
    /// Plaintext listener failed to bind or serve.
    #[error("HTTP server serve: {0}")]
    Http(#[source] io::Error),

    /// TLS material failed to load, or the TLS listener failed to bind or serve.
    #[error("HTTPS server serve: {0}")]
    Https(#[source] io::Error),

    /// `start` was called while another `start` on the same controller was serving.
    #[error("server is already serving")]
    AlreadyServing,
}

/// Drain did not complete before the graceful deadline.
#[derive(Debug, Error)]
#[error("graceful drain exceeded {after:?} with {open} connection(s) still open")]
pub struct DrainError {
    after: Duration,
    open: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Http,
    Https,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Http => "http",
            Mode::Https => "https",
        }
    }

    fn tag(self, error: io::Error) -> ServeError {
        match self {
            Mode::Http => ServeError::Http(error),
            Mode::Https => ServeError::Https(error),
        }
    }
}

/// State owned by a single serve attempt.
pub(crate) struct Attempt {
    id: Uuid,
    handle: Handle,
    shutdown: Shutdown,
    graceful_timeout: Duration,
    deadline: OnceLock<Instant>,
    finished: watch::Sender<bool>,
    local_addr: OnceLock<SocketAddr>,
}

impl Attempt {
    fn new(graceful_timeout: Duration) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            handle: Handle::new(),
            shutdown: Shutdown::new(),
            graceful_timeout,
            deadline: OnceLock::new(),
            finished,
            local_addr: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn shutdown_listener(&self) -> ShutdownListener {
        self.shutdown.subscribe()
    }

    fn request_shutdown(&self) -> bool {
        self.shutdown.trigger()
    }

    fn is_draining(&self) -> bool {
        self.deadline.get().is_some()
    }

    fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    /// Stop accepting, then wait for the serve call to return.
    ///
    /// Only the first caller starts the drain; every caller shares its deadline.
    async fn drain(&self) -> Result<bool, DrainError> {
        let mut initiated = false;
        let deadline = *self.deadline.get_or_init(|| {
            initiated = true;
            Instant::now() + self.graceful_timeout
        });

        if initiated {
            tracing::info!(
                attempt = %self.id,
                timeout = ?self.graceful_timeout,
                connections = self.handle.connection_count(),
                "Draining connections"
            );
            metrics::record_drain();
            self.handle.graceful_shutdown(Some(self.graceful_timeout));
        }

        let mut finished = self.finished.subscribe();
        let drained = tokio::time::timeout_at(deadline, finished.wait_for(|done| *done))
            .await
            .is_ok();

        if drained {
            Ok(initiated)
        } else {
            Err(DrainError {
                after: self.graceful_timeout,
                open: self.handle.connection_count(),
            })
        }
    }

    /// Drain, logging the outcome instead of returning it.
    pub(crate) async fn drain_logged(&self) {
        match self.drain().await {
            Ok(true) => tracing::info!(attempt = %self.id, "Server is shutdown"),
            Ok(false) => {}
            Err(e) => tracing::error!(attempt = %self.id, error = %e, "Shutdown server"),
        }
    }
}

/// Controls the lifecycle of one HTTP(S) server.
///
/// `start` blocks for the lifetime of the server, across restarts. `restart`
/// and `shutdown` are meant to be called from other tasks while it runs, so
/// the controller is usually shared behind an `Arc`. Only one `start` may be
/// in flight per controller.
pub struct ServerController {
    snapshot: ArcSwap<ConfigSnapshot>,
    live: Arc<ArcSwap<LiveSettings>>,
    graceful_timeout: Duration,
    dispatch: Option<Dispatch>,

    active: AtomicBool,
    running: AtomicBool,
    restart_requested: AtomicBool,

    attempt: ArcSwapOption<Attempt>,
}

impl ServerController {
    pub fn new(snapshot: ConfigSnapshot, live: LiveSettings) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            live: Arc::new(ArcSwap::from_pointee(live)),
            graceful_timeout: DEFAULT_GRACEFUL_TIMEOUT,
            dispatch: None,
            active: AtomicBool::new(false),
            running: AtomicBool::new(false),
            restart_requested: AtomicBool::new(false),
            attempt: ArcSwapOption::empty(),
        }
    }

    /// Bound the time a drain waits for in-flight connections.
    pub fn graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Send this controller's lifecycle events to `dispatch` instead of the
    /// global subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Whether a serve call is currently active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a restart has been requested and not yet carried out.
    pub fn restart_pending(&self) -> bool {
        self.restart_requested.load(Ordering::SeqCst)
    }

    /// Address the current attempt is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.attempt
            .load_full()
            .and_then(|attempt| attempt.local_addr.get().copied())
    }

    /// The snapshot the next attempt will use.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    pub fn live_settings(&self) -> Arc<LiveSettings> {
        self.live.load_full()
    }

    /// Stage a change to restart-required fields.
    ///
    /// The running attempt keeps the snapshot it started with; the change
    /// applies once `restart` has cycled the listener.
    pub fn update_config<F>(&self, mut edit: F)
    where
        F: FnMut(&mut ConfigSnapshot),
    {
        self.snapshot.rcu(|current| {
            let mut next = ConfigSnapshot::clone(current);
            edit(&mut next);
            next
        });
    }

    /// Change live settings. Takes effect on the next request.
    pub fn update_live<F>(&self, mut edit: F)
    where
        F: FnMut(&mut LiveSettings),
    {
        self.live.rcu(|current| {
            let mut next = LiveSettings::clone(current);
            edit(&mut next);
            next
        });
    }

    /// Serve until stopped, restarting in place whenever requested.
    ///
    /// Returns `Ok(())` after a deliberate shutdown and the tagged transport
    /// error otherwise.
    pub async fn start(&self) -> Result<(), ServeError> {
        match self.dispatch.clone() {
            Some(dispatch) => self.run().with_subscriber(dispatch).await,
            None => self.run().await,
        }
    }

    /// Cycle the listener, picking up staged configuration.
    ///
    /// No-op unless serving. Concurrent calls collapse into one restart.
    pub fn restart(&self) {
        self.scoped(|| {
            if !self.running.load(Ordering::SeqCst) {
                tracing::debug!("Restart skipped: server is not running");
                return;
            }
            if self.restart_requested.swap(true, Ordering::SeqCst) {
                tracing::debug!("Restart already pending");
                return;
            }
            tracing::info!("Restart requested");
            if let Some(attempt) = self.attempt.load_full() {
                attempt.request_shutdown();
            }
        })
    }

    /// Gracefully stop the current attempt.
    ///
    /// Safe to call repeatedly and concurrently; every call returns within
    /// the graceful timeout of the first. Drain failures are logged.
    pub async fn shutdown(&self) {
        let attempt = self.attempt.load_full();
        let drain = async move {
            match attempt {
                Some(attempt) => attempt.drain_logged().await,
                None => tracing::debug!("Shutdown skipped: no serve attempt in flight"),
            }
        };

        match self.dispatch.clone() {
            Some(dispatch) => drain.with_subscriber(dispatch).await,
            None => drain.await,
        }
    }

    async fn run(&self) -> Result<(), ServeError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(ServeError::AlreadyServing);
        }
        let _active = ActiveGuard(&self.active);
        self.restart_requested.store(false, Ordering::SeqCst);

        loop {
            let result = self.serve_attempt().await;

            if !self.restart_requested.load(Ordering::SeqCst) {
                return result;
            }
            if let Err(e) = &result {
                tracing::error!(error = %e, "Serve attempt failed before restart");
            }

            tracing::info!("Server is restarting");
            metrics::record_restart();

            self.snapshot.rcu(|current| current.rebuild());
        }
    }

    async fn serve_attempt(&self) -> Result<(), ServeError> {
        let snapshot = self.snapshot.load_full();
        let attempt = Arc::new(Attempt::new(self.graceful_timeout));
        self.attempt.store(Some(attempt.clone()));

        let watcher = SignalWatcher::install(attempt.clone());

        // A request that raced the end of the previous attempt must not leak into this one.
        self.restart_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        metrics::set_serving(true);

        let result = self.serve(&snapshot, &attempt).await;

        self.running.store(false, Ordering::SeqCst);
        metrics::set_serving(false);

        attempt.mark_finished();
        watcher.retire().await;
        self.attempt.store(None);

        match result {
            Err(e) if attempt.is_draining() => {
                tracing::debug!(attempt = %attempt.id, error = %e, "Serve returned after shutdown");
                Ok(())
            }
            other => other,
        }
    }

    async fn serve(&self, snapshot: &ConfigSnapshot, attempt: &Attempt) -> Result<(), ServeError> {
        let mode = if snapshot.is_tls() { Mode::Https } else { Mode::Http };
        metrics::record_attempt(mode.as_str());

        let tls = match &snapshot.tls {
            Some(tls) => Some(tls.load().await.map_err(|e| mode.tag(e))?),
            None => None,
        };

        let listener = bind_listener(&snapshot.bind_address)
            .await
            .map_err(|e| mode.tag(e))?;
        let local_addr = listener.local_addr().map_err(|e| mode.tag(e))?;
        let _ = attempt.local_addr.set(local_addr);

        let live = self.live.load_full();
        let service = AttemptService::new(snapshot, self.live.clone());
        let conn_state = snapshot.conn_state.clone();

        match tls {
            Some(tls) => {
                tracing::info!(
                    attempt = %attempt.id,
                    generation = snapshot.generation(),
                    "HTTPS server listening on {local_addr}"
                );
                let mut server = axum_server::tls_rustls::from_tcp_rustls(listener, tls)
                    .handle(attempt.handle.clone())
                    .map(|acceptor| ConnStateAcceptor::new(acceptor, conn_state));
                tune(&mut server, &live);
                server.serve(service).await.map_err(|e| mode.tag(e))
            }
            None => {
                tracing::info!(
                    attempt = %attempt.id,
                    generation = snapshot.generation(),
                    "HTTP server listening on {local_addr}"
                );
                let mut server = axum_server::from_tcp(listener)
                    .handle(attempt.handle.clone())
                    .map(|acceptor| ConnStateAcceptor::new(acceptor, conn_state));
                tune(&mut server, &live);
                server.serve(service).await.map_err(|e| mode.tag(e))
            }
        }
    }

    fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

/// Clears the in-flight `start` marker however `run` ends.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Apply the connection-level live settings to a new attempt's HTTP builder.
fn tune<A>(server: &mut Server<A>, live: &LiveSettings) {
    let builder = server.http_builder();
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(live.read_header_timeout);

    let idle = (!live.idle_timeout.is_zero()).then_some(live.idle_timeout);
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;

    fn controller() -> ServerController {
        ServerController::new(
            ConfigSnapshot::new("127.0.0.1:0", Router::new()),
            LiveSettings::default(),
        )
        .graceful_timeout(Duration::from_millis(200))
    }

    #[test]
    fn restart_is_noop_when_idle() {
        let controller = controller();
        controller.restart();
        assert!(!controller.restart_pending());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn shutdown_is_noop_when_idle() {
        let controller = controller();
        tokio::time::timeout(Duration::from_millis(100), controller.shutdown())
            .await
            .expect("idle shutdown returns at once");
        assert!(controller.local_addr().is_none());
    }

    async fn wait_for_generation(controller: &ServerController, generation: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.snapshot().generation() != generation || controller.local_addr().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("attempt did not start serving");
    }

    #[tokio::test]
    async fn stale_restart_flag_is_cleared_by_start() {
        let controller = Arc::new(controller());
        controller.restart_requested.store(true, Ordering::SeqCst);

        let server = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start().await }
        });
        wait_for_generation(&controller, 0).await;
        assert!(!controller.restart_pending());

        controller.restart();
        wait_for_generation(&controller, 1).await;

        controller.shutdown().await;
        let result = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("start returns after shutdown")
            .unwrap();
        assert!(result.is_ok());
        assert!(!controller.is_running());
        assert_eq!(controller.snapshot().generation(), 1);
    }

    #[test]
    fn staged_config_keeps_generation() {
        let controller = controller();
        controller.update_config(|snapshot| snapshot.bind_address = "127.0.0.1:1".into());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.bind_address, "127.0.0.1:1");
        assert_eq!(snapshot.generation(), 0);
    }

    #[test]
    fn live_update_replaces_settings() {
        let controller = controller();
        let before = controller.live_settings();
        controller.update_live(|live| live.max_header_bytes = 512);

        assert_eq!(controller.live_settings().max_header_bytes, 512);
        assert_eq!(before.max_header_bytes, LiveSettings::default().max_header_bytes);
    }

    #[test]
    fn errors_carry_mode_tag() {
        let err = Mode::Https.tag(io::Error::new(io::ErrorKind::NotFound, "cert.pem"));
        assert!(err.to_string().starts_with("HTTPS server serve"));

        let err = Mode::Http.tag(io::Error::new(io::ErrorKind::AddrInUse, "in use"));
        assert!(matches!(err, ServeError::Http(_)));
    }

    #[tokio::test]
    async fn concurrent_drains_share_one_deadline() {
        let attempt = Arc::new(Attempt::new(Duration::from_millis(100)));
        let started = Instant::now();

        let first = tokio::spawn({
            let attempt = attempt.clone();
            async move { attempt.drain().await.is_err() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = attempt.drain().await;

        assert!(second.is_err());
        assert!(first.await.unwrap());
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(attempt.is_draining());
    }

    #[tokio::test]
    async fn drain_after_finish_returns_immediately() {
        let attempt = Attempt::new(Duration::from_secs(5));
        attempt.mark_finished();

        let initiated = tokio::time::timeout(Duration::from_millis(100), attempt.drain())
            .await
            .expect("finished attempt drains at once")
            .expect("no timeout");
        assert!(initiated);
    }
}
