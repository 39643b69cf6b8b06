//! Telemetry error types.

use thiserror::Error;

/// Errors raised while setting up or tearing down telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The Prometheus recorder could not be installed.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// The tracer provider or its exporter could not be built.
    #[error("failed to initialize tracing: {0}")]
    TracingInit(String),

    /// The log subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// A background exporter did not stop cleanly.
    #[error("failed to shut down telemetry: {0}")]
    Shutdown(String),
}
