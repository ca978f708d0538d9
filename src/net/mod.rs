//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Serve attempt
//!     → listener.rs (bind host:port)
//!     → tls.rs (optional rustls acceptor from PEM or in-memory material)
//!     → connection.rs (Accepted → Established → Closed reporting)
//!     → service.rs (base + per-connection context, live limits)
//!     → router
//! ```
//!
//! # Design Decisions
//! - A fresh listener per attempt; nothing network-facing survives a restart
//! - TLS is optional and handled transparently by the acceptor

pub mod connection;
pub mod listener;
pub mod service;
pub mod tls;

pub use connection::{ConnState, ConnectionId};
pub use tls::TlsSettings;
