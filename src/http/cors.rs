//! Cross-origin resource sharing.
//!
//! # Responsibilities
//! - Echo an allowed `Origin` back in `Access-Control-Allow-Origin`
//! - Answer preflight (`OPTIONS`) requests without invoking the handler
//!
//! # Design Decisions
//! - A `"*"` entry allows any non-empty origin, and the origin itself is
//!   echoed so credentials keep working
//! - Options come from the config file and are baked into the router, so
//!   changing them requires a restart

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsOptions {
    /// Origins allowed to read responses. `"*"` allows any.
    pub allow_origins: Vec<String>,

    pub allow_methods: Vec<String>,

    pub allow_headers: Vec<String>,

    /// Seconds a browser may cache the preflight result.
    pub max_age: u64,

    pub allow_credentials: bool,
}

impl CorsOptions {
    pub fn allows_origin(&self, origin: &str) -> bool {
        !origin.is_empty()
            && self
                .allow_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed == origin)
    }
}

fn joined(values: &[String]) -> Option<HeaderValue> {
    HeaderValue::from_str(&values.join(",")).ok()
}

fn preflight_headers(options: &CorsOptions, headers: &mut HeaderMap) {
    if let Some(methods) = joined(&options.allow_methods) {
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods);
    }
    if let Some(allowed) = joined(&options.allow_headers) {
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allowed);
    }
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(options.max_age));
    if options.allow_credentials {
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    }
}

/// CORS middleware, for use with `axum::middleware::from_fn_with_state`.
pub async fn allow_cors(State(options): State<Arc<CorsOptions>>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(ORIGIN)
        .filter(|origin| origin.to_str().is_ok_and(|o| options.allows_origin(o)))
        .cloned();

    let mut response = if req.method() == Method::OPTIONS {
        tracing::trace!(origin = ?origin, "CORS preflight");
        let mut response = StatusCode::OK.into_response();
        preflight_headers(&options, response.headers_mut());
        response
    } else {
        next.run(req).await
    };

    if let Some(origin) = origin {
        response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    response
}

/// Apply [`allow_cors`] to every route of `router`.
pub fn with_cors(router: Router, options: CorsOptions) -> Router {
    router.layer(axum::middleware::from_fn_with_state(Arc::new(options), allow_cors))
}
