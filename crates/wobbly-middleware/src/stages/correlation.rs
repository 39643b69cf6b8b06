//! Correlation id middleware.
//!
//! Resolves the correlation id of a request and attaches it to a derived
//! [`ExecutionContext`]. Resolution order:
//!
//! 1. **Context**: an id already carried by the context is kept as is, so the
//!    stage is idempotent when a handler is re-entered internally
//! 2. **`correlation-id` header**: a non-empty header value is used verbatim
//! 3. **Generated**: otherwise a fresh id is synthesized
//!
//! The id is recorded on the active OpenTelemetry span, and the downstream
//! future runs inside a `correlated` tracing span, so every log record
//! emitted further down the chain carries the `correlation_id` field.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use tracing::Instrument;
use wobbly_core::{CorrelationId, CorrelationIdGenerator, ExecutionContext};
use wobbly_telemetry::logging::fields;

/// The header carrying the correlation id across hops.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Returns a context that is guaranteed to carry a correlation id.
///
/// `ctx` itself is never modified.
#[must_use]
pub fn ensure_correlation_id(
    ctx: &ExecutionContext,
    request: &Request,
    generator: CorrelationIdGenerator,
) -> ExecutionContext {
    if ctx.correlation_id().is_some() {
        return ctx.clone();
    }

    let from_header = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(CorrelationId::parse);

    let id = match from_header {
        Some(id) => {
            tracing::debug!(correlation_id = %id, "correlation id present");
            id
        }
        None => generator.generate(),
    };

    ctx.with_correlation_id(id)
}

/// Middleware that resolves and propagates the correlation id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationMiddleware {
    generator: CorrelationIdGenerator,
}

impl CorrelationMiddleware {
    /// Creates the middleware with the given fallback generator.
    #[must_use]
    pub const fn new(generator: CorrelationIdGenerator) -> Self {
        Self { generator }
    }
}

impl Middleware for CorrelationMiddleware {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let ctx = ensure_correlation_id(&ctx, &request, self.generator);
        let id = ctx.correlation_id().map_or("", CorrelationId::as_str);

        ctx.otel_context()
            .span()
            .set_attribute(KeyValue::new(fields::CORRELATION_ID, id.to_string()));
        let span = tracing::info_span!("correlated", { fields::CORRELATION_ID } = id);
        Box::pin(next.run(ctx, request).instrument(span))
    }
}
