//! Request context types.
//!
//! The [`ExecutionContext`] carries all per-request state through the middleware
//! pipeline and into handlers. It is never mutated in place: every stage that
//! enriches it derives a new context, so concurrent requests stay isolated and a
//! child hop can never disturb its parent.

use opentelemetry::trace::{Span, TraceContextExt};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identifier tying together all records produced while handling one logical
/// request, including its internal sub-calls.
///
/// A correlation id is never empty. It is created at the edge (or taken
/// verbatim from the `correlation-id` header) and copied forward unchanged.
///
/// # Example
///
/// ```
/// use wobbly_core::CorrelationId;
///
/// let id = CorrelationId::parse("abc-123").unwrap();
/// assert_eq!(id.as_str(), "abc-123");
/// assert!(CorrelationId::parse("").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Wraps a string as a correlation id, rejecting empty values.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            None
        } else {
            Some(Self(Arc::from(value)))
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value)
            .ok_or_else(|| serde::de::Error::custom("correlation id must not be empty"))
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strategy used to synthesize a correlation id when the caller sent none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationIdGenerator {
    /// Time-ordered UUID v7.
    #[default]
    Uuid,
    /// Nanosecond component of the wall clock.
    ///
    /// Collides easily under concurrent load. Kept for parity with load-test
    /// dashboards that expect numeric ids.
    Timestamp,
}

impl CorrelationIdGenerator {
    /// Generates a fresh correlation id.
    #[must_use]
    pub fn generate(self) -> CorrelationId {
        let value = match self {
            Self::Uuid => Uuid::now_v7().to_string(),
            Self::Timestamp => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or_default()
                .to_string(),
        };
        CorrelationId(Arc::from(value))
    }
}

impl FromStr for CorrelationIdGenerator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" => Ok(Self::Uuid),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!("unknown correlation id generator: {other}")),
        }
    }
}

/// Per-request context that flows through the middleware pipeline.
///
/// `ExecutionContext` is an immutable value. The `with_*` methods return a
/// derived copy and leave the receiver untouched, which makes context
/// propagation copy-on-write per hop.
///
/// It carries:
/// - the correlation id (set at most once)
/// - the OpenTelemetry context holding the active span, if any
///
/// # Example
///
/// ```
/// use wobbly_core::{CorrelationId, ExecutionContext};
///
/// let root = ExecutionContext::new();
/// let child = root.with_correlation_id(CorrelationId::parse("abc").unwrap());
///
/// assert!(root.correlation_id().is_none());
/// assert_eq!(child.correlation_id().unwrap().as_str(), "abc");
/// ```
#[derive(Clone, Default)]
pub struct ExecutionContext {
    /// Correlation id of the logical request.
    correlation_id: Option<CorrelationId>,

    /// OpenTelemetry context carrying the active span.
    otel: opentelemetry::Context,
}

impl ExecutionContext {
    /// Creates an empty context with no correlation id and no active span.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the correlation id, if one has been attached.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Returns a derived context carrying `id`.
    ///
    /// The correlation id is immutable once set: if this context already
    /// carries one, the copy keeps the existing id.
    #[must_use]
    pub fn with_correlation_id(&self, id: CorrelationId) -> Self {
        let mut derived = self.clone();
        if derived.correlation_id.is_none() {
            derived.correlation_id = Some(id);
        }
        derived
    }

    /// Returns the OpenTelemetry context.
    #[must_use]
    pub fn otel_context(&self) -> &opentelemetry::Context {
        &self.otel
    }

    /// Returns a derived context whose OpenTelemetry context is `otel`.
    ///
    /// Used to attach a remote parent extracted from inbound headers.
    #[must_use]
    pub fn with_otel_context(&self, otel: opentelemetry::Context) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            otel,
        }
    }

    /// Returns a derived context where `span` is the active span.
    #[must_use]
    pub fn with_span<S>(&self, span: S) -> Self
    where
        S: Span + Send + Sync + 'static,
    {
        self.with_otel_context(self.otel.with_span(span))
    }

    /// Returns the active trace id as lowercase hex, if a valid span is active.
    #[must_use]
    pub fn trace_id(&self) -> Option<String> {
        let span = self.otel.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| span_context.trace_id().to_string())
    }

    /// Returns the active span id as lowercase hex, if a valid span is active.
    #[must_use]
    pub fn span_id(&self) -> Option<String> {
        let span = self.otel.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| span_context.span_id().to_string())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("correlation_id", &self.correlation_id)
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .finish()
    }
}
