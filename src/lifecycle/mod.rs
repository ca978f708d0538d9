//! Server lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Start (controller.rs):
//!     load snapshot → install signal watcher → bind → serve (blocks)
//!
//! Drain (controller.rs + signals.rs):
//!     SIGINT/SIGTERM or restart() → watcher → graceful drain → serve returns
//!     shutdown() → graceful drain → serve returns
//!
//! Restart (controller.rs + snapshot.rs):
//!     serve returned with restart pending → rebuild snapshot → Start again
//! ```
//!
//! # Design Decisions
//! - Restart-required fields live in an immutable snapshot, swapped per attempt
//! - Live settings are read by every request, never require a restart
//! - Drain is bounded: connections still open at the deadline are closed

pub mod controller;
pub mod shutdown;
pub mod signals;
pub mod snapshot;

pub use controller::{DrainError, ServeError, ServerController, DEFAULT_GRACEFUL_TIMEOUT};
pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::SignalWatcher;
pub use snapshot::{BaseContextHook, ConfigSnapshot, ConnContextHook, ConnStateHook, LiveSettings};
