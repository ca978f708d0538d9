//! Per-attempt request context.
//!
//! # Responsibilities
//! - Call the base-context hook once when an attempt starts
//! - Extend that context per connection with the peer address and the
//!   connection-context hook
//! - Put the live-limit guard in front of the snapshot's router
//!
//! # Design Decisions
//! - Context travels as request extensions, so handlers read it with
//!   `Extension<T>` or `ConnectInfo<SocketAddr>` like any axum value

use std::convert::Infallible;
use std::future::{ready, Ready};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::extract::{ConnectInfo, Request};
use axum::http::Extensions;
use axum::response::Response;
use axum::routing::future::RouteFuture;
use axum::Router;
use hyper::body::Incoming;
use tower::Service;

use crate::http::limits::enforce_live_limits;
use crate::lifecycle::snapshot::{ConfigSnapshot, ConnContextHook, LiveSettings};

/// Makes one [`ConnService`] per accepted connection.
#[derive(Clone)]
pub struct AttemptService {
    router: Router,
    base: Extensions,
    conn_context: Option<ConnContextHook>,
}

impl AttemptService {
    pub fn new(snapshot: &ConfigSnapshot, live: Arc<ArcSwap<LiveSettings>>) -> Self {
        let base = snapshot
            .base_context
            .as_ref()
            .map(|hook| hook())
            .unwrap_or_default();

        let router = snapshot
            .router
            .clone()
            .layer(axum::middleware::from_fn_with_state(live, enforce_live_limits));

        Self {
            router,
            base,
            conn_context: snapshot.conn_context.clone(),
        }
    }
}

impl Service<SocketAddr> for AttemptService {
    type Response = ConnService;
    type Error = Infallible;
    type Future = Ready<Result<ConnService, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, peer: SocketAddr) -> Self::Future {
        let mut extensions = self.base.clone();
        extensions.insert(ConnectInfo(peer));
        if let Some(hook) = &self.conn_context {
            hook(peer, &mut extensions);
        }

        ready(Ok(ConnService {
            router: self.router.clone(),
            extensions,
        }))
    }
}

/// Serves the requests of one connection.
#[derive(Clone)]
pub struct ConnService {
    router: Router,
    extensions: Extensions,
}

impl ConnService {
    /// Context every request on this connection starts with.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl Service<Request<Incoming>> for ConnService {
    type Response = Response;
    type Error = Infallible;
    type Future = RouteFuture<Infallible>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        <Router as Service<Request<Incoming>>>::poll_ready(&mut self.router, cx)
    }

    fn call(&mut self, mut req: Request<Incoming>) -> Self::Future {
        req.extensions_mut().extend(self.extensions.clone());
        self.router.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[derive(Clone, Debug, PartialEq)]
    struct Tenant(&'static str);

    #[tokio::test]
    async fn connection_context_layers_over_base_context() {
        let snapshot = ConfigSnapshot::new("127.0.0.1:0", Router::new().route("/", get(|| async { "ok" })))
            .with_base_context(|| {
                let mut base = Extensions::new();
                base.insert(Tenant("base"));
                base
            })
            .with_conn_context(|peer, extensions| {
                if peer.port() == 9 {
                    extensions.insert(Tenant("discard"));
                }
            });
        let live = Arc::new(ArcSwap::from_pointee(LiveSettings::default()));
        let mut service = AttemptService::new(&snapshot, live);

        let plain = service.call("127.0.0.1:8000".parse().unwrap()).await.unwrap();
        assert_eq!(plain.extensions().get::<Tenant>(), Some(&Tenant("base")));

        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let special = service.call(peer).await.unwrap();
        assert_eq!(special.extensions().get::<Tenant>(), Some(&Tenant("discard")));
        assert_eq!(
            special.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0),
            Some(peer)
        );
    }

    #[tokio::test]
    async fn base_context_hook_runs_once_per_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let snapshot = ConfigSnapshot::new("127.0.0.1:0", Router::new()).with_base_context(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Extensions::new()
        });
        let live = Arc::new(ArcSwap::from_pointee(LiveSettings::default()));
        let mut service = AttemptService::new(&snapshot, live);

        for port in 1000..1003 {
            service.call(SocketAddr::from(([127, 0, 0, 1], port))).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
