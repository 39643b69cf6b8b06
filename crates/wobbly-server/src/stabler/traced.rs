use super::Stabler;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::Tracer;
use wobbly_core::{ExecutionContext, SpanScope, UpstreamError};
use wobbly_middleware::stages::span::TRACER_NAME;
use wobbly_middleware::BoxFuture;

/// Name of the span started around every delegated call.
pub const STABLER_SPAN: &str = "stabler";

/// Wraps another [`Stabler`] in a span.
///
/// The span starts before the delegate runs and ends when it returns, on
/// success and on error. The delegate sees a context in which the span is
/// active, so anything it propagates downstream is parented to it.
pub struct TracedStabler<S, T = BoxedTracer> {
    inner: S,
    tracer: T,
}

impl<S: Stabler> TracedStabler<S> {
    /// Wraps `inner` using a tracer from the global provider.
    pub fn new(inner: S) -> Self {
        Self::with_tracer(inner, global::tracer(TRACER_NAME))
    }
}

impl<S, T> TracedStabler<S, T>
where
    S: Stabler,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    /// Wraps `inner` using an explicit tracer.
    pub fn with_tracer(inner: S, tracer: T) -> Self {
        Self { inner, tracer }
    }
}

impl<S, T> std::fmt::Debug for TracedStabler<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedStabler").finish_non_exhaustive()
    }
}

impl<S, T> Stabler for TracedStabler<S, T>
where
    S: Stabler,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn stable<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<String, UpstreamError>> {
        Box::pin(async move {
            let scope = SpanScope::start(&self.tracer, STABLER_SPAN, ctx);
            let result = self.inner.stable(scope.context()).await;
            if let Err(e) = &result {
                scope.set_error(e.to_string());
            }
            result
        })
    }
}
