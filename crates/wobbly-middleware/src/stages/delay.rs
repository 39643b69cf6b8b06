//! Delay injection middleware.
//!
//! Sleeps for a random duration in `[0, max)` before delegating. The chosen
//! delay is recorded on the active span, both as an event and as the
//! `wobbly.delay_ms` attribute, so slow traces point at their injected cause.
//! Only the current task sleeps.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::random::{RandomSource, ThreadRandom};
use crate::types::{Request, Response};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use wobbly_core::ExecutionContext;
use wobbly_telemetry::logging::fields;

/// Span attribute holding the injected delay in milliseconds.
pub const DELAY_ATTRIBUTE: &str = "wobbly.delay_ms";

/// Middleware that injects random latency.
pub struct DelayInjection {
    max: Duration,
    random: Arc<dyn RandomSource>,
}

impl DelayInjection {
    /// Creates the stage with the thread-local random source.
    #[must_use]
    pub fn new(max: Duration) -> Self {
        Self::with_random(max, Arc::new(ThreadRandom))
    }

    /// Creates the stage with an explicit random source.
    #[must_use]
    pub fn with_random(max: Duration, random: Arc<dyn RandomSource>) -> Self {
        Self { max, random }
    }
}

impl std::fmt::Debug for DelayInjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayInjection")
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl Middleware for DelayInjection {
    fn name(&self) -> &'static str {
        "delay_injection"
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let delay = self.random.duration_below(self.max);
        let ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);

        let span = ctx.otel_context().span();
        span.add_event("slowing down", vec![KeyValue::new(DELAY_ATTRIBUTE, ms)]);
        span.set_attribute(KeyValue::new(DELAY_ATTRIBUTE, ms));
        tracing::info!({ fields::DELAY_MS } = ms, "slowing down");

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            next.run(ctx, request).await
        })
    }
}
