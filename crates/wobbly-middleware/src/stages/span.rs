//! Span middleware.
//!
//! Starts a span named after the route before delegating and ends it once the
//! response has been produced. HTTP method, path and response status are
//! recorded as attributes, and a 5xx response marks the span as failed.
//!
//! At the process edge the stage can adopt a remote parent from the inbound
//! `traceparent` header, which links the stable endpoint's spans to the
//! unstable caller across the internal hop.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::Tracer;
use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, URL_PATH,
};
use wobbly_core::{ExecutionContext, SpanScope};

/// Instrumentation scope used for all wobbly spans.
pub const TRACER_NAME: &str = "wobbly";

/// Middleware that brackets the chain with a span.
pub struct SpanMiddleware<T = BoxedTracer> {
    span_name: &'static str,
    tracer: T,
    extract_remote: bool,
}

impl SpanMiddleware<BoxedTracer> {
    /// Creates the stage with a tracer from the global provider.
    #[must_use]
    pub fn new(span_name: &'static str) -> Self {
        Self::with_tracer(span_name, global::tracer(TRACER_NAME))
    }
}

impl<T> SpanMiddleware<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    /// Creates the stage with an explicit tracer.
    #[must_use]
    pub fn with_tracer(span_name: &'static str, tracer: T) -> Self {
        Self {
            span_name,
            tracer,
            extract_remote: false,
        }
    }

    /// Adopts a parent span from the inbound `traceparent` header.
    #[must_use]
    pub fn extract_remote_parent(mut self) -> Self {
        self.extract_remote = true;
        self
    }

    /// Returns the name given to spans started by this stage.
    #[must_use]
    pub fn span_name(&self) -> &'static str {
        self.span_name
    }
}

impl<T> std::fmt::Debug for SpanMiddleware<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanMiddleware")
            .field("span_name", &self.span_name)
            .field("extract_remote", &self.extract_remote)
            .finish_non_exhaustive()
    }
}

impl<T> Middleware for SpanMiddleware<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "span"
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let parent = if self.extract_remote {
            let remote = wobbly_telemetry::extract_context(ctx.otel_context(), request.headers());
            ctx.with_otel_context(remote)
        } else {
            ctx
        };

        let scope = SpanScope::start(&self.tracer, self.span_name, &parent);
        scope.set_attribute(KeyValue::new(HTTP_REQUEST_METHOD, request.method().to_string()));
        scope.set_attribute(KeyValue::new(URL_PATH, request.uri().path().to_string()));

        Box::pin(async move {
            let response = next.run(scope.context().clone(), request).await;

            let status = response.status();
            scope.set_attribute(KeyValue::new(
                HTTP_RESPONSE_STATUS_CODE,
                i64::from(status.as_u16()),
            ));
            if status.is_server_error() {
                scope.set_error(format!("responded with {status}"));
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::{Request as HttpRequest, StatusCode};
    use http_body_util::Full;
    use opentelemetry::propagation::TextMapPropagator;
    use opentelemetry::trace::{Status, TraceContextExt, TracerProvider as _};
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use opentelemetry_sdk::trace::{Tracer as SdkTracer, TracerProvider};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use wobbly_telemetry::tracing::HeaderInjector;

    fn provider() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    fn stage(provider: &TracerProvider, name: &'static str) -> SpanMiddleware<SdkTracer> {
        SpanMiddleware::with_tracer(name, provider.tracer("test"))
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/stable")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_span_brackets_handler() {
        let (provider, exporter) = provider();
        let stage = stage(&provider, "http-stable");

        let seen = Arc::new(Mutex::new(None));
        let handler = {
            let seen = seen.clone();
            handler_fn(move |ctx: ExecutionContext, _req| {
                *seen.lock() = ctx.span_id();
                async { Response::text(StatusCode::OK, "hello world") }
            })
        };

        let response = stage
            .process(ExecutionContext::new(), request(), Next::handler(&handler))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "http-stable");
        assert_eq!(
            Some(spans[0].span_context.span_id().to_string()),
            *seen.lock()
        );
        assert_eq!(spans[0].status, Status::Unset);
        assert!(spans[0]
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == URL_PATH && kv.value.as_str() == "/stable"));
    }

    #[tokio::test]
    async fn test_server_error_marks_span_failed() {
        let (provider, exporter) = provider();
        let stage = stage(&provider, "http-unstable");
        let handler = handler_fn(|_ctx, _req| async {
            Response::empty(StatusCode::INTERNAL_SERVER_ERROR)
        });

        stage
            .process(ExecutionContext::new(), request(), Next::handler(&handler))
            .await;

        let spans = exporter.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn test_nested_stages_share_trace() {
        let (provider, exporter) = provider();
        let outer = stage(&provider, "logic routing");
        let inner = stage(&provider, "http-stable");
        let handler = handler_fn(|_ctx, _req| async { Response::empty(StatusCode::OK) });

        outer
            .process(
                ExecutionContext::new(),
                request(),
                Next::new(&inner, Next::handler(&handler)),
            )
            .await;

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let inner_span = spans.iter().find(|s| s.name == "http-stable").unwrap();
        let outer_span = spans.iter().find(|s| s.name == "logic routing").unwrap();
        assert_eq!(inner_span.parent_span_id, outer_span.span_context.span_id());
        assert_eq!(
            inner_span.span_context.trace_id(),
            outer_span.span_context.trace_id()
        );
    }

    #[tokio::test]
    async fn test_remote_parent_adopted_when_enabled() {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let (provider, exporter) = provider();

        let remote_span = provider.tracer("caller").start("stabler");
        let remote = opentelemetry::Context::new().with_span(remote_span);
        let mut request = request();
        TraceContextPropagator::new()
            .inject_context(&remote, &mut HeaderInjector(request.headers_mut()));

        let stage = stage(&provider, "logic routing").extract_remote_parent();
        let handler = handler_fn(|_ctx, _req| async { Response::empty(StatusCode::OK) });
        stage
            .process(ExecutionContext::new(), request, Next::handler(&handler))
            .await;

        let spans = exporter.get_finished_spans().unwrap();
        let routed = spans.iter().find(|s| s.name == "logic routing").unwrap();
        assert_eq!(
            routed.span_context.trace_id(),
            remote.span().span_context().trace_id()
        );
        assert_eq!(routed.parent_span_id, remote.span().span_context().span_id());
    }
}
