//! Stabler that calls `/stable` over HTTP.
//!
//! The outbound request carries the caller's correlation id in the
//! `correlation-id` header and the active span in `traceparent`. The
//! response body is released exactly once on every path, including early
//! returns on a bad status and failed reads. A failed release is logged and
//! never changes the result.

use super::Stabler;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use std::time::Duration;
use wobbly_core::{ExecutionContext, ServiceError, ServiceResult, UpstreamError};
use wobbly_middleware::stages::CORRELATION_ID_HEADER;
use wobbly_middleware::BoxFuture;
use wobbly_telemetry::logging::fields;

/// A response whose body has not been read yet.
pub trait UpstreamBody: Send + 'static {
    /// Status line of the response.
    fn status(&self) -> StatusCode;

    /// Reads the whole body.
    fn read_all(&mut self) -> BoxFuture<'_, Result<Bytes, UpstreamError>>;

    /// Releases the underlying connection. Called exactly once.
    fn release(&mut self) -> Result<(), ServiceError>;
}

/// Issues GET requests.
pub trait Transport: Send + Sync + 'static {
    /// Response type handed back on success.
    type Body: UpstreamBody;

    /// Sends a GET to `url` with `headers`.
    ///
    /// Fails with [`UpstreamError::Dial`] when no response arrives.
    fn get<'a>(
        &'a self,
        url: &'a str,
        headers: HeaderMap,
    ) -> BoxFuture<'a, Result<Self::Body, UpstreamError>>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds the client. `None` means requests never time out.
    pub fn new(timeout: Option<Duration>) -> ServiceResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            ServiceError::configuration(format!("failed to create http client: {e}"))
        })?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    type Body = ReqwestBody;

    fn get<'a>(
        &'a self,
        url: &'a str,
        headers: HeaderMap,
    ) -> BoxFuture<'a, Result<Self::Body, UpstreamError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .headers(headers)
                .send()
                .await
                .map_err(|e| UpstreamError::dial(url, e.to_string()))?;

            Ok(ReqwestBody {
                status: response.status(),
                response: Some(response),
            })
        })
    }
}

/// Response body held by [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestBody {
    status: StatusCode,
    response: Option<reqwest::Response>,
}

impl UpstreamBody for ReqwestBody {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn read_all(&mut self) -> BoxFuture<'_, Result<Bytes, UpstreamError>> {
        let response = self.response.take();
        Box::pin(async move {
            match response {
                Some(response) => response
                    .bytes()
                    .await
                    .map_err(|e| UpstreamError::read(e.to_string())),
                None => Err(UpstreamError::read("body already consumed")),
            }
        })
    }

    fn release(&mut self) -> Result<(), ServiceError> {
        // Dropping an unread response closes its connection instead of
        // returning it to the pool.
        self.response.take();
        Ok(())
    }
}

/// Releases the body when dropped.
struct ReleaseOnDrop<B: UpstreamBody> {
    body: B,
}

impl<B: UpstreamBody> Drop for ReleaseOnDrop<B> {
    fn drop(&mut self) {
        if let Err(e) = self.body.release() {
            tracing::error!(error = %e, "could not release response body");
        }
    }
}

/// Fetches the stable body with a GET to a configured URL.
#[derive(Debug)]
pub struct HttpStabler<T = ReqwestTransport> {
    url: String,
    transport: T,
}

impl<T: Transport> HttpStabler<T> {
    /// Creates a stabler targeting `url`.
    pub fn new(url: impl Into<String>, transport: T) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }

    /// Returns the target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn outbound_headers(ctx: &ExecutionContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(id) = ctx.correlation_id() {
            match HeaderValue::from_str(id.as_str()) {
                Ok(value) => {
                    headers.insert(CORRELATION_ID_HEADER, value);
                }
                Err(_) => {
                    tracing::warn!(
                        { fields::CORRELATION_ID } = %id,
                        "correlation id is not a valid header value"
                    );
                }
            }
        }
        wobbly_telemetry::inject_context(ctx.otel_context(), &mut headers);
        headers
    }
}

impl<T: Transport> Stabler for HttpStabler<T> {
    fn stable<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<String, UpstreamError>> {
        Box::pin(async move {
            let headers = Self::outbound_headers(ctx);
            let body = self.transport.get(&self.url, headers).await?;
            let mut guard = ReleaseOnDrop { body };

            let status = guard.body.status();
            if !status.is_success() {
                return Err(UpstreamError::Status {
                    url: self.url.clone(),
                    status: status.as_u16(),
                });
            }

            let bytes = guard.body.read_all().await?;
            drop(guard);

            String::from_utf8(bytes.to_vec()).map_err(|e| UpstreamError::read(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Tracer, TracerProvider as _};
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::trace::TracerProvider;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wobbly_core::CorrelationId;

    const URL: &str = "http://localhost:8080/stable";

    struct FakeBody {
        status: StatusCode,
        body: Result<Bytes, UpstreamError>,
        releases: Arc<AtomicUsize>,
        release_fails: bool,
    }

    impl UpstreamBody for FakeBody {
        fn status(&self) -> StatusCode {
            self.status
        }

        fn read_all(&mut self) -> BoxFuture<'_, Result<Bytes, UpstreamError>> {
            let body = self.body.clone();
            Box::pin(async move { body })
        }

        fn release(&mut self) -> Result<(), ServiceError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.release_fails {
                Err(ServiceError::ResourceRelease("close failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeTransport {
        dial_error: Option<UpstreamError>,
        status: StatusCode,
        body: Result<Bytes, UpstreamError>,
        release_fails: bool,
        releases: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<HeaderMap>>>,
    }

    impl FakeTransport {
        fn answering(status: StatusCode, body: Result<Bytes, UpstreamError>) -> Self {
            Self {
                dial_error: None,
                status,
                body,
                release_fails: false,
                releases: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Transport for FakeTransport {
        type Body = FakeBody;

        fn get<'a>(
            &'a self,
            url: &'a str,
            headers: HeaderMap,
        ) -> BoxFuture<'a, Result<Self::Body, UpstreamError>> {
            self.seen.lock().push(headers);
            let result = match &self.dial_error {
                Some(err) => Err(err.clone()),
                None => Ok(FakeBody {
                    status: self.status,
                    body: self.body.clone(),
                    releases: Arc::clone(&self.releases),
                    release_fails: self.release_fails,
                }),
            };
            assert_eq!(url, URL);
            Box::pin(async move { result })
        }
    }

    fn correlated(id: &str) -> ExecutionContext {
        ExecutionContext::new().with_correlation_id(CorrelationId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_success_returns_body_and_releases_once() {
        let transport = FakeTransport::answering(StatusCode::OK, Ok(Bytes::from("hello world")));
        let releases = Arc::clone(&transport.releases);
        let stabler = HttpStabler::new(URL, transport);

        let body = stabler.stable(&ExecutionContext::new()).await.unwrap();

        assert_eq!(body, "hello world");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forwards_correlation_id() {
        let transport = FakeTransport::answering(StatusCode::OK, Ok(Bytes::from("hello world")));
        let seen = Arc::clone(&transport.seen);
        let stabler = HttpStabler::new(URL, transport);

        stabler.stable(&correlated("abc-123")).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get(CORRELATION_ID_HEADER).unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn test_without_correlation_id_sends_no_header() {
        let transport = FakeTransport::answering(StatusCode::OK, Ok(Bytes::from("hello world")));
        let seen = Arc::clone(&transport.seen);
        let stabler = HttpStabler::new(URL, transport);

        stabler.stable(&ExecutionContext::new()).await.unwrap();
        assert!(seen.lock()[0].get(CORRELATION_ID_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_injects_traceparent_of_active_span() {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let provider = TracerProvider::builder().build();
        let tracer = provider.tracer("test");
        let parent = ExecutionContext::new();
        let ctx = parent.with_span(tracer.start_with_context("unstable", parent.otel_context()));

        let transport = FakeTransport::answering(StatusCode::OK, Ok(Bytes::from("hello world")));
        let seen = Arc::clone(&transport.seen);
        let stabler = HttpStabler::new(URL, transport);
        stabler.stable(&ctx).await.unwrap();

        let seen = seen.lock();
        let traceparent = seen[0].get("traceparent").unwrap().to_str().unwrap();
        assert!(traceparent.contains(&ctx.trace_id().unwrap()));
    }

    #[tokio::test]
    async fn test_read_failure_is_read_error_and_releases_once() {
        let transport = FakeTransport::answering(
            StatusCode::OK,
            Err(UpstreamError::read("connection reset")),
        );
        let releases = Arc::clone(&transport.releases);
        let stabler = HttpStabler::new(URL, transport);

        let err = stabler.stable(&ExecutionContext::new()).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Read { .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error_and_releases_once() {
        let transport =
            FakeTransport::answering(StatusCode::SERVICE_UNAVAILABLE, Ok(Bytes::from("busy")));
        let releases = Arc::clone(&transport.releases);
        let stabler = HttpStabler::new(URL, transport);

        let err = stabler.stable(&ExecutionContext::new()).await.unwrap_err();

        assert_eq!(
            err,
            UpstreamError::Status {
                url: URL.to_string(),
                status: 503
            }
        );
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_has_nothing_to_release() {
        let mut transport = FakeTransport::answering(StatusCode::OK, Ok(Bytes::new()));
        transport.dial_error = Some(UpstreamError::dial(URL, "connection refused"));
        let releases = Arc::clone(&transport.releases);
        let stabler = HttpStabler::new(URL, transport);

        let err = stabler.stable(&ExecutionContext::new()).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Dial { .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_release_failure_does_not_fail_the_call() {
        let mut transport =
            FakeTransport::answering(StatusCode::OK, Ok(Bytes::from("hello world")));
        transport.release_fails = true;
        let releases = Arc::clone(&transport.releases);
        let stabler = HttpStabler::new(URL, transport);

        let body = stabler.stable(&ExecutionContext::new()).await.unwrap();

        assert_eq!(body, "hello world");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_read_error() {
        let transport =
            FakeTransport::answering(StatusCode::OK, Ok(Bytes::from_static(&[0xff, 0xfe])));
        let stabler = HttpStabler::new(URL, transport);

        let err = stabler.stable(&ExecutionContext::new()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Read { .. }));
    }

    #[test]
    fn test_reqwest_transport_builds_with_and_without_timeout() {
        assert!(ReqwestTransport::new(None).is_ok());
        assert!(ReqwestTransport::new(Some(Duration::from_secs(1))).is_ok());
    }
}
