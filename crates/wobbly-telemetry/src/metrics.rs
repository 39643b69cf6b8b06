//! Prometheus metrics for wobbly.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `wobbly_http_requests_total` | Counter | `route` | Requests that entered a route |
//! | `wobbly_http_requests_success_total` | Counter | `route` | Requests answered below 500 |
//! | `wobbly_http_request_duration_seconds` | Histogram | `route` | Wall-clock latency |
//!
//! The recorder is installed globally by [`init_metrics`]. Stages never touch
//! the global recorder directly: they receive [`RouteMetrics`] handles, which
//! tests can build from plain atomics instead.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram, Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Total requests per route.
pub const REQUESTS_TOTAL: &str = "wobbly_http_requests_total";

/// Requests answered with a status below 500, per route.
pub const REQUESTS_SUCCESS_TOTAL: &str = "wobbly_http_requests_success_total";

/// Request latency in seconds, per route.
pub const REQUEST_DURATION_SECONDS: &str = "wobbly_http_request_duration_seconds";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,

    /// How often the recorder drains idle histogram samples.
    pub upkeep_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Injected delays go up to one second, so stretch past it.
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.5, 5.0,
            ],
            upkeep_interval: Duration::from_secs(5),
        }
    }
}

/// Metric handles bound to one route label.
#[derive(Clone)]
pub struct RouteMetrics {
    /// Incremented once per request entering the route.
    pub requests: Counter,
    /// Incremented once per request answered with a status below 500.
    pub successes: Counter,
    /// Latency observations.
    pub duration: Histogram,
}

impl RouteMetrics {
    /// Registers (or looks up) the handles for `route` on the active recorder.
    pub fn for_route(route: &'static str) -> Self {
        Self {
            requests: counter!(REQUESTS_TOTAL, "route" => route),
            successes: counter!(REQUESTS_SUCCESS_TOTAL, "route" => route),
            duration: histogram!(REQUEST_DURATION_SECONDS, "route" => route),
        }
    }
}

impl std::fmt::Debug for RouteMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMetrics").finish_non_exhaustive()
    }
}

/// Builds a Prometheus recorder without installing it.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the bucket list is rejected.
pub fn build_recorder(config: &MetricsConfig) -> TelemetryResult<PrometheusRecorder> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    Ok(builder.build_recorder())
}

/// Installs the global Prometheus recorder.
///
/// Returns `None` when metrics are disabled. Rendering is left to the caller,
/// which serves the output on its own listener.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a global recorder is already set.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let recorder = build_recorder(config)?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();

    Ok(Some(handle))
}

/// Spawns the periodic upkeep task for `handle`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_upkeep(handle: PrometheusHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            handle.run_upkeep();
        }
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests that entered a route"
    );
    describe_counter!(
        REQUESTS_SUCCESS_TOTAL,
        Unit::Count,
        "Number of HTTP requests answered with a status below 500"
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
}
