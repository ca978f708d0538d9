//! Response formatting through a [`Codec`].

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, CodecError};

/// Writes handler results as encoded response bodies.
#[derive(Debug, Clone, Default)]
pub struct Formatter<C> {
    codec: C,
}

impl<C: Codec> Formatter<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Build a response with `status` and, when given, `value` as the body.
    pub fn respond<T: Serialize + ?Sized>(&self, status: StatusCode, value: Option<&T>) -> Response {
        self.respond_with_headers(HeaderMap::new(), status, value)
    }

    /// Like [`respond`](Self::respond), starting from `headers`.
    ///
    /// The codec's content type is set only if `headers` has none. With no
    /// value the response carries the status alone.
    pub fn respond_with_headers<T: Serialize + ?Sized>(
        &self,
        mut headers: HeaderMap,
        status: StatusCode,
        value: Option<&T>,
    ) -> Response {
        let body = match value {
            None => Body::empty(),
            Some(value) => {
                let mut buf = Vec::new();
                if let Err(e) = self.codec.encode(&mut buf, value) {
                    tracing::error!(error = %e, status = %status, "Failed to encode response");
                    let mut response = Response::new(Body::from(
                        StatusCode::INTERNAL_SERVER_ERROR
                            .canonical_reason()
                            .unwrap_or_default(),
                    ));
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    return response;
                }
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.codec.content_type()));
                }
                Body::from(buf)
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Decode a request body.
    pub fn decode<T: DeserializeOwned>(&self, mut body: &[u8]) -> Result<T, CodecError> {
        self.codec.decode(&mut body)
    }
}
