//! Outgoing HTTP client.
//!
//! # Data Flow
//! ```text
//! caller
//!     → PanicCatcher (panic → ClientError::Panicked)
//!     → Timer (METHOD URI elapsed)
//!     → Dump (request / response heads)
//!     → hyper-util legacy client (pooled connections)
//! ```

pub mod middleware;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use crate::observability::LogLevel;

pub use middleware::{Dump, DumpLayer, PanicCatcher, PanicCatcherLayer, Timer, TimerLayer};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Client with the standard layers applied.
pub type HttpClient = BoxCloneService<Request<Body>, Response<Incoming>, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client transport: {0}")]
    Transport(#[source] BoxError),

    #[error("HTTP client panicked: {0}")]
    Panicked(String),
}

impl From<hyper_util::client::legacy::Error> for ClientError {
    fn from(error: hyper_util::client::legacy::Error) -> Self {
        ClientError::Transport(Box::new(error))
    }
}

/// Build a plaintext client whose timer and dump layers log at `level`.
pub fn build_client(level: LogLevel) -> HttpClient {
    let client: Client<HttpConnector, Body> = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    let service = ServiceBuilder::new()
        .layer(PanicCatcherLayer)
        .layer(TimerLayer::new(level))
        .layer(DumpLayer::new(level))
        .service(client);

    BoxCloneService::new(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn client_round_trips_through_layers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        tokio::spawn(async move { axum::serve(listener, router).await });

        let client = build_client(LogLevel::Debug);
        let req = Request::builder()
            .uri(format!("http://{addr}/ping"))
            .body(Body::empty())
            .unwrap();
        let response = client.oneshot(req).await.unwrap();
        assert!(response.status().is_success());

        let body = axum::body::to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"pong");
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(Body::empty())
            .unwrap();
        let err = build_client(LogLevel::Info).oneshot(req).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
