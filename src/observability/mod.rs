//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle, HTTP and client layers produce:
//!     → logging.rs (structured log events, global or per-controller dispatch)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
