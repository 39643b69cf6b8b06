//! Logging, metrics and tracing setup for wobbly.
//!
//! - **Logging**: structured records via `tracing-subscriber`, JSON by default
//! - **Metrics**: Prometheus recorder for the `metrics` facade
//! - **Tracing**: OpenTelemetry tracer provider with optional OTLP export
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wobbly_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let guard = init_telemetry(TelemetryConfig::default())?;
//! // ... serve traffic ...
//! guard.shutdown(Duration::from_secs(5)).await;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, MetricsConfig, RouteMetrics};
pub use tracing::{extract_context, init_tracing, inject_context, TracingConfig};

use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry_sdk::trace::TracerProvider;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Owns the background telemetry machinery.
///
/// Keep the guard alive for the lifetime of the process and call
/// [`TelemetryGuard::shutdown`] once traffic has drained. Dropping the guard
/// without calling it still flushes spans, but without a time bound.
pub struct TelemetryGuard {
    tracer_provider: Option<TracerProvider>,
    metrics: Option<PrometheusHandle>,
    upkeep: Option<JoinHandle<()>>,
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(tracer_provider: Option<TracerProvider>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            tracer_provider,
            metrics,
            upkeep: None,
        }
    }

    /// Returns the handle used to render `/metrics`, if metrics are enabled.
    #[must_use]
    pub fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }

    /// Starts periodic histogram upkeep. Must be called inside a Tokio runtime.
    pub fn start_upkeep(&mut self, every: Duration) {
        if self.upkeep.is_none() {
            if let Some(handle) = &self.metrics {
                self.upkeep = Some(crate::metrics::spawn_upkeep(handle.clone(), every));
            }
        }
    }

    /// Stops upkeep and flushes the tracer provider, waiting at most `grace`.
    ///
    /// The provider shutdown blocks on the exporter, so it runs on the
    /// blocking pool. If it overruns `grace` the error is logged and the
    /// process is left to exit anyway.
    pub async fn shutdown(mut self, grace: Duration) -> TelemetryResult<()> {
        if let Some(upkeep) = self.upkeep.take() {
            upkeep.abort();
        }
        if let Some(handle) = &self.metrics {
            handle.run_upkeep();
        }

        let Some(provider) = self.tracer_provider.take() else {
            return Ok(());
        };

        let flush = tokio::task::spawn_blocking(move || shutdown_provider(&provider));
        match tokio::time::timeout(grace, flush).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(TelemetryError::Shutdown(join.to_string())),
            Err(_) => Err(TelemetryError::Shutdown(format!(
                "tracer provider did not stop within {grace:?}"
            ))),
        }
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("tracing", &self.tracer_provider.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

fn shutdown_provider(provider: &TracerProvider) -> TelemetryResult<()> {
    for result in provider.force_flush() {
        if let Err(e) = result {
            ::tracing::warn!(error = %e, "could not flush spans");
        }
    }
    provider
        .shutdown()
        .map_err(|e| TelemetryError::Shutdown(e.to_string()))
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(upkeep) = self.upkeep.take() {
            upkeep.abort();
        }
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = shutdown_provider(&provider) {
                ::tracing::error!(error = %e, "tracer provider shutdown failed");
            }
        }
    }
}

/// Initializes logging, metrics and tracing, in that order.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    let metrics = init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing)?;

    Ok(TelemetryGuard::new(tracer_provider, metrics))
}
