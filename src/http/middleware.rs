//! Server-side middleware.
//!
//! # Responsibilities
//! - `timer`: log method, URI and elapsed time per request
//! - `dump`: log full request and response messages
//! - `panic_catcher`: turn a panicking handler into a 500, logging the
//!   message and the backtrace of the panic site
//!
//! # Design Decisions
//! - Timer and dump check their level before doing any work, so a disabled
//!   level costs one filter lookup
//! - Dump buffers both bodies and forwards rebuilt messages; meant for debugging
//! - The unwind has already left the panic site when the catcher runs, so a
//!   process panic hook records the backtrace in a thread-local for it

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt::Write as _;
use std::sync::Once;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;

use crate::observability::LogLevel;

/// Handler the panic catcher calls with the panic payload.
pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Log `METHOD URI elapsed` at `level`.
pub async fn timer(State(level): State<LogLevel>, req: Request, next: Next) -> Response {
    if !level.enabled() {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = next.run(req).await;
    level.log(format_args!("{} {} {:?}", method, uri, start.elapsed()));
    response
}

/// Log the request and the response, bodies included, at `level`.
pub async fn dump(State(level): State<LogLevel>, req: Request, next: Next) -> Response {
    if !level.enabled() {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body for dump");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let head = format!("{} {} {:?}", parts.method, parts.uri, parts.version);
    level.log(format_args!("{}", render(&head, &parts.headers, &body)));

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read response body for dump");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let head = format!("{:?} {}", parts.version, parts.status);
    level.log(format_args!("{}", render(&head, &parts.headers, &body)));

    Response::from_parts(parts, Body::from(body))
}

/// Wire-like rendering of an HTTP message.
pub(crate) fn render(head: &str, headers: &HeaderMap, body: &Bytes) -> String {
    let mut out = String::with_capacity(head.len() + body.len() + 64);
    out.push_str(head);
    out.push_str("\r\n");
    for (name, value) in headers {
        let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(body));
    out
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chain a panic hook that stores the panicking thread's backtrace.
///
/// The previous hook still runs afterwards.
pub(crate) fn install_backtrace_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            PANIC_BACKTRACE.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(backtrace);
                }
            });
            previous(info);
        }));
    });
}

/// Backtrace of the last panic on this thread, rendered for logging.
pub(crate) fn take_panic_backtrace() -> String {
    PANIC_BACKTRACE
        .with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .map(|backtrace| backtrace.to_string())
        .unwrap_or_else(|| "<unavailable>".to_string())
}

/// Catch panics from the wrapped handlers, log them with their backtrace and
/// answer 500.
pub fn panic_catcher() -> CatchPanicLayer<PanicHandler> {
    install_backtrace_hook();
    CatchPanicLayer::custom(handle_panic as PanicHandler)
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(
        panic = %panic_message(payload.as_ref()),
        backtrace = %take_panic_backtrace(),
        "Handler panicked"
    );

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Apply dump, timer and the panic catcher, outermost last.
pub fn with_standard_layers(router: Router, level: LogLevel) -> Router {
    router
        .layer(axum::middleware::from_fn_with_state(level, dump))
        .layer(axum::middleware::from_fn_with_state(level, timer))
        .layer(panic_catcher())
}
