//! Connection state tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Report Accepted → Established → Closed to the snapshot's hook
//! - Guarantee exactly one Closed per connection, whatever ends it

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use axum_server::accept::Accept;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::lifecycle::snapshot::ConnStateHook;

/// Relaxed is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state reported to a [`ConnStateHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// TCP connection accepted, handshake not yet done.
    Accepted,
    /// Handshake (TLS or none) finished; HTTP is being served.
    Established,
    /// Connection is closed.
    Closed,
}

/// Reports `Closed` when dropped.
struct ConnectionGuard {
    id: ConnectionId,
    hook: Option<ConnStateHook>,
}

impl ConnectionGuard {
    fn open(hook: Option<ConnStateHook>) -> Self {
        let guard = Self {
            id: ConnectionId::new(),
            hook,
        };
        guard.report(ConnState::Accepted);
        guard
    }

    fn report(&self, state: ConnState) {
        if let Some(hook) = &self.hook {
            hook(self.id, state);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.report(ConnState::Closed);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Acceptor wrapper reporting connection state transitions.
#[derive(Clone)]
pub struct ConnStateAcceptor<A> {
    inner: A,
    hook: Option<ConnStateHook>,
}

impl<A> ConnStateAcceptor<A> {
    pub fn new(inner: A, hook: Option<ConnStateHook>) -> Self {
        Self { inner, hook }
    }
}

impl<A, I, S> Accept<I, S> for ConnStateAcceptor<A>
where
    A: Accept<I, S>,
    A::Future: Send + 'static,
    A::Stream: Send + 'static,
    A::Service: Send + 'static,
{
    type Stream = TrackedStream<A::Stream>;
    type Service = A::Service;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let guard = ConnectionGuard::open(self.hook.clone());
        let handshake = self.inner.accept(stream, service);

        Box::pin(async move {
            let (stream, service) = handshake.await?;
            guard.report(ConnState::Established);
            tracing::trace!(connection_id = %guard.id, "Connection established");
            Ok((
                TrackedStream {
                    inner: stream,
                    _guard: guard,
                },
                service,
            ))
        })
    }
}

/// Stream that reports `Closed` once the server drops it.
pub struct TrackedStream<T> {
    inner: T,
    _guard: ConnectionGuard,
}

impl<T: AsyncRead + Unpin> AsyncRead for TrackedStream<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrackedStream<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.to_string().starts_with("conn-"));
    }

    #[test]
    fn guard_reports_closed_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook: ConnStateHook = Arc::new(move |id: ConnectionId, state: ConnState| {
            sink.lock().unwrap().push((id, state))
        });

        let guard = ConnectionGuard::open(Some(hook));
        guard.report(ConnState::Established);
        let id = guard.id;
        drop(guard);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (id, ConnState::Accepted),
                (id, ConnState::Established),
                (id, ConnState::Closed),
            ]
        );
    }

    #[test]
    fn guard_without_hook_is_silent() {
        let guard = ConnectionGuard::open(None);
        assert!(guard.id.as_u64() > 0);
    }
}
