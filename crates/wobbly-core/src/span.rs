//! Scoped span acquisition.

use crate::context::ExecutionContext;
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use std::borrow::Cow;

/// A started span bound to a derived [`ExecutionContext`].
///
/// The span ends when the scope is dropped, on every exit path, so its
/// lifetime strictly brackets the work done with [`SpanScope::context`].
///
/// # Example
///
/// ```ignore
/// let scope = SpanScope::start(&tracer, "stabler", &ctx);
/// let result = inner.stable(scope.context()).await;
/// drop(scope); // span ends here
/// ```
#[derive(Debug)]
pub struct SpanScope {
    ctx: ExecutionContext,
}

impl SpanScope {
    /// Starts a span named `name` as a child of the span active in `parent`.
    pub fn start<T>(
        tracer: &T,
        name: impl Into<Cow<'static, str>>,
        parent: &ExecutionContext,
    ) -> Self
    where
        T: Tracer,
        T::Span: Send + Sync + 'static,
    {
        let span = tracer.start_with_context(name, parent.otel_context());
        Self {
            ctx: parent.with_span(span),
        }
    }

    /// Returns the context in which the span is active.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Sets an attribute on the span.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.ctx.otel_context().span().set_attribute(attribute);
    }

    /// Marks the span as failed.
    pub fn set_error(&self, description: impl Into<Cow<'static, str>>) {
        self.ctx
            .otel_context()
            .span()
            .set_status(Status::error(description));
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        self.ctx.otel_context().span().end();
    }
}
