//! Fault injection middleware.
//!
//! In [`FaultMode::Active`] each request flips a coin and, on failure,
//! short-circuits with an empty HTTP 500 without calling downstream. In
//! [`FaultMode::PassThrough`] the stage always delegates; the hook point stays
//! in the chain but does nothing.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::random::{RandomSource, ThreadRandom};
use crate::types::{Request, Response, ResponseExt};
use opentelemetry::trace::TraceContextExt;
use std::sync::Arc;
use wobbly_core::{ExecutionContext, ServiceError};

/// Whether synthetic failures are injected.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FaultMode {
    /// Always delegate.
    #[default]
    PassThrough,
    /// Fail with the given probability.
    Active {
        /// Probability in `(0, 1]` that a request fails.
        probability: f64,
    },
}

impl FaultMode {
    /// Maps a configured probability to a mode. Zero or less disables injection.
    #[must_use]
    pub fn from_probability(probability: f64) -> Self {
        if probability > 0.0 {
            Self::Active {
                probability: probability.min(1.0),
            }
        } else {
            Self::PassThrough
        }
    }
}

/// Middleware that injects synthetic failures.
pub struct FaultInjection {
    mode: FaultMode,
    random: Arc<dyn RandomSource>,
}

impl FaultInjection {
    /// Creates the stage with the thread-local random source.
    #[must_use]
    pub fn new(mode: FaultMode) -> Self {
        Self::with_random(mode, Arc::new(ThreadRandom))
    }

    /// Creates the stage with an explicit random source.
    #[must_use]
    pub fn with_random(mode: FaultMode, random: Arc<dyn RandomSource>) -> Self {
        Self { mode, random }
    }

    fn should_fail(&self) -> bool {
        match self.mode {
            FaultMode::PassThrough => false,
            FaultMode::Active { probability } => self.random.chance(probability),
        }
    }
}

impl std::fmt::Debug for FaultInjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjection")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Middleware for FaultInjection {
    fn name(&self) -> &'static str {
        "fault_injection"
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        if self.should_fail() {
            let err = ServiceError::InjectedFault;
            ctx.otel_context().span().add_event("fault injected", Vec::new());
            tracing::warn!(error = %err, "failing request on purpose");
            return Box::pin(async move { Response::empty(err.status_code()) });
        }

        Box::pin(next.run(ctx, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::random::{FixedRandom, SeededRandom};
    use bytes::Bytes;
    use http::{Request as HttpRequest, StatusCode};
    use http_body_util::Full;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/unstable")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn counting_handler(calls: &Arc<AtomicUsize>) -> impl crate::Handler {
        let calls = calls.clone();
        handler_fn(move |_ctx, _req| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Response::text(StatusCode::OK, "hello world") }
        })
    }

    #[test]
    fn test_mode_from_probability() {
        assert_eq!(FaultMode::from_probability(0.0), FaultMode::PassThrough);
        assert_eq!(FaultMode::from_probability(-0.3), FaultMode::PassThrough);
        assert_eq!(
            FaultMode::from_probability(0.5),
            FaultMode::Active { probability: 0.5 }
        );
        assert_eq!(
            FaultMode::from_probability(3.0),
            FaultMode::Active { probability: 1.0 }
        );
    }

    #[tokio::test]
    async fn test_active_failure_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(&calls);
        let stage = FaultInjection::with_random(
            FaultMode::Active { probability: 0.5 },
            Arc::new(FixedRandom::failing()),
        );

        let response = stage
            .process(ExecutionContext::new(), request(), Next::handler(&handler))
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pass_through_always_delegates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(&calls);
        let stage =
            FaultInjection::with_random(FaultMode::PassThrough, Arc::new(FixedRandom::failing()));

        for _ in 0..20 {
            let response = stage
                .process(ExecutionContext::new(), request(), Next::handler(&handler))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_active_ratio_with_seeded_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(&calls);
        let stage = FaultInjection::with_random(
            FaultMode::Active { probability: 0.5 },
            Arc::new(SeededRandom::new(2024)),
        );

        let mut failures = 0;
        for _ in 0..2_000 {
            let response = stage
                .process(ExecutionContext::new(), request(), Next::handler(&handler))
                .await;
            if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
                failures += 1;
            }
        }

        assert!((900..=1_100).contains(&failures), "failures = {failures}");
        assert_eq!(calls.load(Ordering::SeqCst), 2_000 - failures);
    }
}
