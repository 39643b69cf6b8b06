//! Top-level routing for the logic and metrics listeners.
//!
//! The logic listener serves:
//!
//! | Path | Pipeline |
//! |------|----------|
//! | `/stable` | span → timing → counting → correlation → [`StableHandler`] |
//! | `/unstable` | span → timing → counting → correlation → fault → delay → [`UnstableHandler`] |
//! | anything else | 404 `not found` |
//!
//! The whole router is wrapped in a `logic routing` span that adopts the
//! caller's `traceparent`, so an internal `/stable` call joins the trace of
//! the `/unstable` request that made it.

use crate::config::{ServiceConfig, StablerKind};
use crate::handlers::{StableHandler, UnstableHandler};
use crate::stabler::{BoxedStabler, DirectStabler, HttpStabler, ReqwestTransport, TracedStabler};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use wobbly_core::{CorrelationIdGenerator, ExecutionContext, ServiceResult};
use wobbly_middleware::stages::{
    CorrelationMiddleware, DelayInjection, FaultInjection, FaultMode, RequestCounting,
    RequestTiming, SpanMiddleware,
};
use wobbly_middleware::{
    BoxFuture, BoxedHandler, Handler, Pipeline, RandomSource, Request, Response, ResponseExt,
    ThreadRandom,
};
use wobbly_telemetry::logging::fields;

/// Span around the whole logic router.
pub const LOGIC_SPAN: &str = "logic routing";
/// Span around the `/stable` pipeline.
pub const STABLE_SPAN: &str = "http-stable";
/// Span around the `/unstable` pipeline.
pub const UNSTABLE_SPAN: &str = "http-unstable";

/// Body of every 404.
pub const NOT_FOUND_BODY: &str = "not found";

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

fn not_found() -> Response {
    Response::text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

/// Builds the handler served by the logic listener.
pub struct LogicRoutes {
    stabler: BoxedStabler,
    correlation_ids: CorrelationIdGenerator,
    fault: FaultMode,
    max_delay: Duration,
    random: Arc<dyn RandomSource>,
}

impl LogicRoutes {
    /// Creates routes around `stabler` with pass-through faults and up to one
    /// second of injected delay.
    pub fn new(stabler: BoxedStabler) -> Self {
        Self {
            stabler,
            correlation_ids: CorrelationIdGenerator::default(),
            fault: FaultMode::PassThrough,
            max_delay: Duration::from_millis(crate::config::DEFAULT_MAX_DELAY_MS),
            random: Arc::new(ThreadRandom),
        }
    }

    /// Creates routes from the service configuration.
    ///
    /// The configured Stabler is always wrapped in a [`TracedStabler`].
    pub fn from_config(config: &ServiceConfig) -> ServiceResult<Self> {
        let stabler: BoxedStabler = match config.stabler {
            StablerKind::Http => {
                let transport = ReqwestTransport::new(config.upstream_timeout())?;
                Arc::new(TracedStabler::new(HttpStabler::new(
                    config.stable_url.clone(),
                    transport,
                )))
            }
            StablerKind::Direct => Arc::new(TracedStabler::new(DirectStabler)),
        };

        Ok(Self::new(stabler)
            .correlation_ids(config.correlation_ids)
            .fault_mode(config.fault_mode())
            .max_delay(config.max_delay()))
    }

    /// Sets the generator used when a request carries no correlation id.
    pub fn correlation_ids(mut self, generator: CorrelationIdGenerator) -> Self {
        self.correlation_ids = generator;
        self
    }

    /// Sets the fault injection mode of `/unstable`.
    pub fn fault_mode(mut self, mode: FaultMode) -> Self {
        self.fault = mode;
        self
    }

    /// Sets the exclusive upper bound of the injected delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Sets the random source shared by fault and delay injection.
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Returns the pipeline in front of [`StableHandler`].
    pub fn stable_pipeline(&self) -> Pipeline {
        Pipeline::builder()
            .stage(SpanMiddleware::new(STABLE_SPAN))
            .stage(RequestTiming::for_route("stable"))
            .stage(RequestCounting::for_route("stable"))
            .stage(CorrelationMiddleware::new(self.correlation_ids))
            .build()
    }

    /// Returns the pipeline in front of [`UnstableHandler`].
    ///
    /// Fault injection sits outside delay injection, so a request that is
    /// failed on purpose fails immediately.
    pub fn unstable_pipeline(&self) -> Pipeline {
        Pipeline::builder()
            .stage(SpanMiddleware::new(UNSTABLE_SPAN))
            .stage(RequestTiming::for_route("unstable"))
            .stage(RequestCounting::for_route("unstable"))
            .stage(CorrelationMiddleware::new(self.correlation_ids))
            .stage(FaultInjection::with_random(self.fault, Arc::clone(&self.random)))
            .stage(DelayInjection::with_random(self.max_delay, Arc::clone(&self.random)))
            .build()
    }

    /// Assembles the complete logic handler.
    pub fn build(self) -> BoxedHandler {
        let stable = self.stable_pipeline().wrap(Arc::new(StableHandler));
        let unstable = self
            .unstable_pipeline()
            .wrap(Arc::new(UnstableHandler::new(Arc::clone(&self.stabler))));

        let router: BoxedHandler = Arc::new(LogicRouter { stable, unstable });
        Pipeline::builder()
            .stage(SpanMiddleware::new(LOGIC_SPAN).extract_remote_parent())
            .build()
            .wrap(router)
    }
}

impl std::fmt::Debug for LogicRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicRoutes")
            .field("correlation_ids", &self.correlation_ids)
            .field("fault", &self.fault)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// Dispatches by path to the stable and unstable handlers.
pub struct LogicRouter {
    stable: BoxedHandler,
    unstable: BoxedHandler,
}

impl LogicRouter {
    /// Creates a router from already composed route handlers.
    pub fn new(stable: BoxedHandler, unstable: BoxedHandler) -> Self {
        Self { stable, unstable }
    }
}

impl Handler for LogicRouter {
    fn call<'a>(&'a self, ctx: ExecutionContext, request: Request) -> BoxFuture<'a, Response> {
        tracing::info!({ fields::URI } = %request.uri(), "handling new request");

        let route = match request.uri().path() {
            "/stable" => Some(&self.stable),
            "/unstable" => Some(&self.unstable),
            _ => None,
        };

        match route {
            Some(handler) => handler.call(ctx, request),
            None => Box::pin(async { not_found() }),
        }
    }
}

/// Serves `/metrics` from a Prometheus handle.
#[derive(Clone)]
pub struct MetricsRouter {
    handle: Option<PrometheusHandle>,
}

impl MetricsRouter {
    /// Creates the router. Without a handle `/metrics` answers with an empty body.
    pub fn new(handle: Option<PrometheusHandle>) -> Self {
        Self { handle }
    }

    fn render(&self) -> Response {
        let body = self
            .handle
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default();
        let mut response = Response::text(StatusCode::OK, body);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
        response
    }
}

impl std::fmt::Debug for MetricsRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRouter")
            .field("enabled", &self.handle.is_some())
            .finish()
    }
}

impl Handler for MetricsRouter {
    fn call<'a>(&'a self, _ctx: ExecutionContext, request: Request) -> BoxFuture<'a, Response> {
        let response = if request.uri().path() == "/metrics" {
            self.render()
        } else {
            not_found()
        };
        Box::pin(async move { response })
    }
}
