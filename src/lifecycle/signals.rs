//! OS signal handling for one serve attempt.
//!
//! # Responsibilities
//! - Register SIGINT/SIGTERM (Ctrl-C elsewhere) when an attempt begins
//! - Wait for a signal or the attempt's programmatic trigger
//! - Drain the attempt exactly once, then retire
//!
//! # Design Decisions
//! - Registration happens synchronously in `install`, so a signal raised
//!   right after the attempt starts is never missed
//! - The programmatic trigger belongs to the attempt, not the process:
//!   restarting one controller never disturbs another

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;

use crate::lifecycle::controller::Attempt;

/// Bridges termination requests to a graceful drain of one attempt.
pub struct SignalWatcher {
    task: JoinHandle<()>,
    retire: oneshot::Sender<()>,
}

impl SignalWatcher {
    /// Register signal handlers and spawn the bridge task for `attempt`.
    pub(crate) fn install(attempt: Arc<Attempt>) -> Self {
        let mut signals = TerminationSignals::register();
        let mut trigger = attempt.shutdown_listener();
        let (retire, mut retired) = oneshot::channel();

        let task = tokio::spawn(
            async move {
                tokio::select! {
                    signal = signals.recv() => {
                        tracing::info!(attempt = %attempt.id(), signal, "Termination signal received");
                    }
                    _ = trigger.notified() => {
                        tracing::debug!(attempt = %attempt.id(), "Shutdown requested");
                    }
                    _ = &mut retired => return,
                }
                attempt.drain_logged().await;
            }
            .with_current_subscriber(),
        );

        Self { task, retire }
    }

    /// Release the signal subscription.
    ///
    /// If the bridge already fired, waits for its drain to finish; otherwise
    /// it is told to exit without draining.
    pub(crate) async fn retire(self) {
        let _ = self.retire.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Signal watcher task failed");
        }
    }
}

/// Process termination signals registered for the lifetime of one watcher.
struct TerminationSignals {
    #[cfg(unix)]
    interrupt: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl TerminationSignals {
    #[cfg(unix)]
    fn register() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let install = |kind: SignalKind, name: &str| match signal(kind) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(signal = name, error = %e, "Failed to install signal handler");
                None
            }
        };

        Self {
            interrupt: install(SignalKind::interrupt(), "SIGINT"),
            terminate: install(SignalKind::terminate(), "SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    fn register() -> Self {
        Self {}
    }

    /// Wait for the next termination signal and name it.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        let Self {
            interrupt,
            terminate,
        } = self;

        let interrupt = async {
            match interrupt {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        let terminate = async {
            match terminate {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = interrupt => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    }
}
