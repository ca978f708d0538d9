//! Request limits read from the live settings.
//!
//! # Responsibilities
//! - Reject requests whose request line and headers exceed `max_header_bytes`
//! - Bound handler time by `request_timeout`
//! - Report every rejection to the configured error sink
//!
//! # Design Decisions
//! - Settings are loaded once per request, so a change applies to the next
//!   request without a restart
//! - Return 431 Request Header Fields Too Large or 503 Service Unavailable

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::lifecycle::snapshot::LiveSettings;

/// A request the server refused to complete.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{method} {uri}: headers are {size} bytes, limit is {limit}")]
    HeadersTooLarge {
        method: Method,
        uri: Uri,
        size: usize,
        limit: usize,
    },

    #[error("{method} {uri}: no response after {after:?}")]
    Timeout {
        method: Method,
        uri: Uri,
        after: Duration,
    },
}

/// Destination for per-request failures.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &RequestError);
}

impl<F> ErrorSink for F
where
    F: Fn(&RequestError) + Send + Sync,
{
    fn report(&self, error: &RequestError) {
        self(error)
    }
}

/// Logs request failures as warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, error: &RequestError) {
        tracing::warn!(error = %error, "Request rejected");
    }
}

/// Bytes of the request line plus headers, as seen on the wire.
fn header_bytes(req: &Request) -> usize {
    let line = req.method().as_str().len()
        + req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().len())
            .unwrap_or(1);

    req.headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum::<usize>()
        + line
}

/// Middleware applying the current live settings to one request.
pub async fn enforce_live_limits(
    State(live): State<Arc<ArcSwap<LiveSettings>>>,
    req: Request,
    next: Next,
) -> Response {
    let live = live.load_full();

    let size = header_bytes(&req);
    if size > live.max_header_bytes {
        live.error_sink.report(&RequestError::HeadersTooLarge {
            method: req.method().clone(),
            uri: req.uri().clone(),
            size,
            limit: live.max_header_bytes,
        });
        return StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE.into_response();
    }

    if live.request_timeout.is_zero() {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let uri = req.uri().clone();
    match tokio::time::timeout(live.request_timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            live.error_sink.report(&RequestError::Timeout {
                method,
                uri,
                after: live.request_timeout,
            });
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn guarded(live: LiveSettings) -> (Router, Arc<ArcSwap<LiveSettings>>) {
        let live = Arc::new(ArcSwap::from_pointee(live));
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(axum::middleware::from_fn_with_state(live.clone(), enforce_live_limits));
        (router, live)
    }

    #[tokio::test]
    async fn oversized_headers_get_431() {
        let (router, _) = guarded(LiveSettings {
            max_header_bytes: 64,
            ..LiveSettings::default()
        });

        let req = Request::builder()
            .uri("/")
            .header("x-padding", "a".repeat(128))
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
    }

    #[tokio::test]
    async fn limit_change_applies_to_next_request() {
        let (router, live) = guarded(LiveSettings::default());
        let req = || {
            Request::builder()
                .uri("/")
                .header("x-padding", "a".repeat(128))
                .body(Body::empty())
                .unwrap()
        };

        let resp = router.clone().oneshot(req()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        live.rcu(|current| LiveSettings {
            max_header_bytes: 64,
            ..LiveSettings::clone(current)
        });
        let resp = router.oneshot(req()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
    }

    #[tokio::test]
    async fn slow_handler_gets_503_and_is_reported() {
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        let (router, _) = guarded(LiveSettings {
            request_timeout: Duration::from_millis(50),
            error_sink: Arc::new(move |error: &RequestError| {
                assert!(matches!(error, RequestError::Timeout { .. }));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            ..LiveSettings::default()
        });

        let req = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }
}
