//! Tower layers for outgoing requests.
//!
//! Each layer wraps any `Service<Request<B>>` answering with `Response<RB>`,
//! so the same stack works over hyper's client or a test double.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::{Layer, Service};

use crate::client::ClientError;
use crate::http::middleware::{install_backtrace_hook, panic_message, render, take_panic_backtrace};
use crate::observability::LogLevel;

/// Logs `METHOD URI elapsed` for each round trip.
#[derive(Debug, Clone, Copy)]
pub struct TimerLayer {
    level: LogLevel,
}

impl TimerLayer {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl<S> Layer<S> for TimerLayer {
    type Service = Timer<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timer {
            inner,
            level: self.level,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timer<S> {
    inner: S,
    level: LogLevel,
}

impl<S, B, RB> Service<Request<B>> for Timer<S>
where
    S: Service<Request<B>, Response = Response<RB>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let level = self.level;
        if !level.enabled() {
            return Box::pin(self.inner.call(req));
        }

        let method = req.method().clone();
        let uri = req.uri().clone();
        let start = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            level.log(format_args!("{} {} {:?}", method, uri, start.elapsed()));
            result
        })
    }
}

/// Turns a panic inside the wrapped client into [`ClientError::Panicked`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicCatcherLayer;

impl<S> Layer<S> for PanicCatcherLayer {
    type Service = PanicCatcher<S>;

    fn layer(&self, inner: S) -> Self::Service {
        install_backtrace_hook();
        PanicCatcher { inner }
    }
}

#[derive(Debug, Clone)]
pub struct PanicCatcher<S> {
    inner: S,
}

fn caught(payload: Box<dyn Any + Send>) -> ClientError {
    let message = panic_message(payload.as_ref());
    tracing::error!(
        panic = %message,
        backtrace = %take_panic_backtrace(),
        "HTTP client panicked"
    );
    ClientError::Panicked(message)
}

impl<S, B> Service<Request<B>> for PanicCatcher<S>
where
    S: Service<Request<B>>,
    S::Error: Into<ClientError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<S::Response, ClientError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let inner = &mut self.inner;
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let error = caught(payload);
                return Box::pin(async move { Err(error) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result.map_err(Into::into),
                Err(payload) => Err(caught(payload)),
            }
        })
    }
}

/// Logs request and response heads. Bodies stream through untouched.
#[derive(Debug, Clone, Copy)]
pub struct DumpLayer {
    level: LogLevel,
}

impl DumpLayer {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl<S> Layer<S> for DumpLayer {
    type Service = Dump<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Dump {
            inner,
            level: self.level,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dump<S> {
    inner: S,
    level: LogLevel,
}

impl<S, B, RB> Service<Request<B>> for Dump<S>
where
    S: Service<Request<B>, Response = Response<RB>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let level = self.level;
        if !level.enabled() {
            return Box::pin(self.inner.call(req));
        }

        let head = format!("{} {} {:?}", req.method(), req.uri(), req.version());
        level.log(format_args!("{}", render(&head, req.headers(), &Bytes::new())));

        let fut = self.inner.call(req);
        Box::pin(async move {
            let response = fut.await?;
            let head = format!("{:?} {}", response.version(), response.status());
            level.log(format_args!("{}", render(&head, response.headers(), &Bytes::new())));
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn request() -> Request<String> {
        Request::builder()
            .uri("http://upstream.test/items")
            .body(String::new())
            .unwrap()
    }

    #[tokio::test]
    async fn panic_in_future_is_an_error() {
        let svc = ServiceBuilder::new()
            .layer(PanicCatcherLayer)
            .service(service_fn(|_req: Request<String>| async move {
                if true {
                    panic!("transport blew up");
                }
                Ok::<_, ClientError>(Response::new(String::new()))
            }));

        match svc.oneshot(request()).await {
            Err(ClientError::Panicked(message)) => assert_eq!(message, "transport blew up"),
            other => panic!("expected a caught panic, got {other:?}"),
        }
    }

    #[derive(Clone)]
    struct PanicsOnCall;

    impl Service<Request<String>> for PanicsOnCall {
        type Response = Response<String>;
        type Error = ClientError;
        type Future = std::future::Ready<Result<Response<String>, ClientError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<String>) -> Self::Future {
            panic!("refused synchronously")
        }
    }

    #[tokio::test]
    async fn panic_in_call_is_an_error() {
        let svc = PanicCatcherLayer.layer(PanicsOnCall);
        let err = svc.oneshot(request()).await.unwrap_err();
        assert!(matches!(err, ClientError::Panicked(m) if m == "refused synchronously"));
    }

    #[tokio::test]
    async fn timer_and_dump_pass_responses_through() {
        let svc = ServiceBuilder::new()
            .layer(TimerLayer::new(LogLevel::Info))
            .layer(DumpLayer::new(LogLevel::Debug))
            .service(service_fn(|req: Request<String>| async move {
                let mut response = Response::new(req.uri().path().to_string());
                *response.status_mut() = StatusCode::ACCEPTED;
                Ok::<_, Infallible>(response)
            }));

        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body(), "/items");
    }
}
