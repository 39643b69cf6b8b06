//! HTTP request and response types used by the pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building plain responses.
pub trait ResponseExt {
    /// Creates a `text/plain` response with the given status and body.
    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// Creates a response with the given status and an empty body.
    fn empty(status: StatusCode) -> Response;
}

impl ResponseExt for Response {
    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response {
        let mut response = Self::empty(status);
        *response.body_mut() = Full::new(body.into());
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }
}
