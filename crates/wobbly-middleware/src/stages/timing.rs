//! Latency recording middleware.
//!
//! Records the wall-clock duration of the wrapped chain into the route's
//! histogram exactly once per request, from a drop guard, so early returns
//! and abandoned requests are recorded too. The trace id active when the
//! request entered the stage is handed to an [`ExemplarSink`] alongside the
//! observation.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use metrics::Histogram;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wobbly_core::ExecutionContext;
use wobbly_telemetry::logging::fields;
use wobbly_telemetry::RouteMetrics;

/// Receives the trace id attached to each latency observation.
pub trait ExemplarSink: Send + Sync + 'static {
    /// Called once per observation.
    fn observe(&self, route: &'static str, elapsed: Duration, trace_id: Option<&str>);
}

/// Emits exemplars as `debug` log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExemplarSink;

impl ExemplarSink for LogExemplarSink {
    fn observe(&self, route: &'static str, elapsed: Duration, trace_id: Option<&str>) {
        if let Some(trace_id) = trace_id {
            tracing::debug!(
                { fields::ROUTE } = route,
                { fields::TRACE_ID } = trace_id,
                seconds = elapsed.as_secs_f64(),
                "latency exemplar"
            );
        }
    }
}

/// Middleware that records request latency.
pub struct RequestTiming {
    route: &'static str,
    histogram: Histogram,
    exemplars: Arc<dyn ExemplarSink>,
}

impl RequestTiming {
    /// Creates the stage with an explicit histogram and exemplar sink.
    #[must_use]
    pub fn new(
        route: &'static str,
        histogram: Histogram,
        exemplars: Arc<dyn ExemplarSink>,
    ) -> Self {
        Self {
            route,
            histogram,
            exemplars,
        }
    }

    /// Creates the stage with the route's histogram from the installed
    /// recorder, logging exemplars.
    #[must_use]
    pub fn for_route(route: &'static str) -> Self {
        Self::new(
            route,
            RouteMetrics::for_route(route).duration,
            Arc::new(LogExemplarSink),
        )
    }
}

impl std::fmt::Debug for RequestTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTiming")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

struct RecordOnDrop<'a> {
    stage: &'a RequestTiming,
    started: Instant,
    trace_id: Option<String>,
}

impl Drop for RecordOnDrop<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.stage.histogram.record(elapsed.as_secs_f64());
        self.stage
            .exemplars
            .observe(self.stage.route, elapsed, self.trace_id.as_deref());
    }
}

impl Middleware for RequestTiming {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let _record = RecordOnDrop {
                stage: self,
                started: Instant::now(),
                trace_id: ctx.trace_id(),
            };
            next.run(ctx, request).await
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
    use metrics::HistogramFn;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::TracerProvider;
    use parking_lot::Mutex;
    use wobbly_core::SpanScope;

    #[derive(Default)]
    struct Samples(Mutex<Vec<f64>>);

    impl HistogramFn for Samples {
        fn record(&self, value: f64) {
            self.0.lock().push(value);
        }
    }

    #[derive(Default)]
    struct Exemplars(Mutex<Vec<Option<String>>>);

    impl ExemplarSink for Exemplars {
        fn observe(&self, _route: &'static str, _elapsed: Duration, trace_id: Option<&str>) {
            self.0.lock().push(trace_id.map(str::to_string));
        }
    }

    fn stage() -> (RequestTiming, Arc<Samples>, Arc<Exemplars>) {
        let samples = Arc::new(Samples::default());
        let exemplars = Arc::new(Exemplars::default());
        let stage = RequestTiming::new(
            "stable",
            Histogram::from_arc(samples.clone()),
            exemplars.clone(),
        );
        (stage, samples, exemplars)
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/stable")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_records_once_per_request() {
        let (stage, samples, exemplars) = stage();
        let handler = handler_fn(|_ctx, _req| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Response::text(StatusCode::OK, "hello world")
        });

        stage
            .process(ExecutionContext::new(), request(), Next::handler(&handler))
            .await;

        let samples = samples.0.lock();
        assert_eq!(samples.len(), 1);
        assert!(samples[0] >= 0.02);
        assert_eq!(*exemplars.0.lock(), vec![None]);
    }

    #[tokio::test]
    async fn test_records_on_error_responses() {
        let (stage, samples, _) = stage();
        let handler = handler_fn(|_ctx, _req| async {
            Response::empty(StatusCode::INTERNAL_SERVER_ERROR)
        });

        let response = stage
            .process(ExecutionContext::new(), request(), Next::handler(&handler))
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(samples.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_active_trace_id_used_as_exemplar() {
        let provider = TracerProvider::builder().build();
        let tracer = provider.tracer("test");
        let scope = SpanScope::start(&tracer, "http-stable", &ExecutionContext::new());
        let trace_id = scope.context().trace_id();
        assert!(trace_id.is_some());

        let (stage, _, exemplars) = stage();
        let handler = handler_fn(|_ctx, _req| async { Response::empty(StatusCode::OK) });
        stage
            .process(scope.context().clone(), request(), Next::handler(&handler))
            .await;

        assert_eq!(*exemplars.0.lock(), vec![trace_id]);
    }
}
