//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve and bind the configured `host:port`
//! - Hand the bound socket to the serve loop in non-blocking std form
//!
//! # Design Decisions
//! - Bound through Tokio so `SO_REUSEADDR` is set on unix; a restart can
//!   rebind the port while the previous attempt's sockets sit in TIME_WAIT

use std::io;

use tokio::net::TcpListener;

/// Bind `address` and return the listener ready for `axum_server::from_tcp`.
pub async fn bind_listener(address: &str) -> io::Result<std::net::TcpListener> {
    if address.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty bind address",
        ));
    }

    let listener = TcpListener::bind(address).await?;
    let local_addr = listener.local_addr()?;

    tracing::debug!(
        requested = %address,
        address = %local_addr,
        "Listener bound"
    );

    listener.into_std()
}
