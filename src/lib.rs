//! HTTP server lifecycle library.
//!
//! Serves an axum router over HTTP or HTTPS, drains gracefully on SIGINT or
//! SIGTERM, and restarts in place to pick up restart-required configuration.

pub mod client;
pub mod codec;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use codec::{Codec, JsonCodec};
pub use config::ServerConfig;
pub use http::Formatter;
pub use lifecycle::{ConfigSnapshot, LiveSettings, ServeError, ServerController};
