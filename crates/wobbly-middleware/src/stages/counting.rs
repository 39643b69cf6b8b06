//! Request counting middleware.
//!
//! Increments the route's total counter once per request, and the success
//! counter when the status produced downstream is below 500. The total is
//! counted from a drop guard, so a request abandoned mid-flight is still
//! counted.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use metrics::Counter;
use wobbly_core::ExecutionContext;
use wobbly_telemetry::RouteMetrics;

/// Middleware that counts requests per route.
#[derive(Clone)]
pub struct RequestCounting {
    route: &'static str,
    total: Counter,
    success: Counter,
}

impl RequestCounting {
    /// Creates the stage with explicit counter handles.
    #[must_use]
    pub fn new(route: &'static str, total: Counter, success: Counter) -> Self {
        Self {
            route,
            total,
            success,
        }
    }

    /// Creates the stage with the route's counters from the installed recorder.
    #[must_use]
    pub fn for_route(route: &'static str) -> Self {
        let metrics = RouteMetrics::for_route(route);
        Self::new(route, metrics.requests, metrics.successes)
    }
}

impl std::fmt::Debug for RequestCounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCounting")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

struct CountOnDrop<'a>(&'a Counter);

impl Drop for CountOnDrop<'_> {
    fn drop(&mut self) {
        self.0.increment(1);
    }
}

impl Middleware for RequestCounting {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let _total = CountOnDrop(&self.total);
            let response = next.run(ctx, request).await;
            if !response.status().is_server_error() {
                self.success.increment(1);
            }
            response
        })
    }
}
