//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection service (net::service)
//!     → limits.rs (live header and time limits)
//!     → middleware.rs (panic catcher → timer → dump)
//!     → cors.rs (origin checks, preflight answers)
//!     → handler
//!     → formatter.rs (encode response through a codec)
//! ```

pub mod cors;
pub mod formatter;
pub mod limits;
pub mod middleware;

pub use cors::{allow_cors, with_cors, CorsOptions};
pub use formatter::Formatter;
pub use limits::{ErrorSink, LogErrorSink, RequestError};
pub use middleware::with_standard_layers;
