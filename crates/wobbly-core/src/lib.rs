//! # Wobbly Core
//!
//! Core types shared by every wobbly crate:
//!
//! - [`ExecutionContext`] - Immutable per-request context carrying the correlation id
//!   and the active OpenTelemetry span
//! - [`CorrelationId`] - Identifier tying together every record of one logical request
//! - [`CorrelationIdGenerator`] - Strategy used when no correlation id was supplied
//! - [`SpanScope`] - Scoped span acquisition that ends the span exactly once
//! - [`ServiceError`] / [`UpstreamError`] - Error taxonomy

#![doc(html_root_url = "https://docs.rs/wobbly-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod span;

pub use context::{CorrelationId, CorrelationIdGenerator, ExecutionContext};
pub use error::{ServiceError, ServiceResult, UpstreamError};
pub use span::SpanScope;
