//! Middleware stages.
//!
//! | Stage | Middleware | Purpose |
//! |-------|------------|---------|
//! | `span` | [`SpanMiddleware`] | Bracket the chain with an OpenTelemetry span |
//! | `timing` | [`RequestTiming`] | Record latency into the route histogram |
//! | `counting` | [`RequestCounting`] | Count total and successful requests |
//! | `correlation` | [`CorrelationMiddleware`] | Resolve and propagate the correlation id |
//! | `fault_injection` | [`FaultInjection`] | Fail requests on a coin flip |
//! | `delay_injection` | [`DelayInjection`] | Add random latency |

pub mod correlation;
pub mod counting;
pub mod delay;
pub mod fault;
pub mod span;
pub mod timing;

pub use correlation::{ensure_correlation_id, CorrelationMiddleware, CORRELATION_ID_HEADER};
pub use counting::RequestCounting;
pub use delay::DelayInjection;
pub use fault::{FaultInjection, FaultMode};
pub use span::SpanMiddleware;
pub use timing::{ExemplarSink, LogExemplarSink, RequestTiming};
