//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name used in the trace resource and log records.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Tracing configuration.
    pub tracing: TracingConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "wobbly".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    tracing: Option<TracingConfig>,
    logging: Option<LogConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn service_version(mut self, version: &str) -> Self {
        self.service_version = Some(version.to_string());
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Sets the OTLP collector endpoint. Spans are exported only when one is set.
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: Option<&str>) -> Self {
        let config = self.tracing.take().unwrap_or_default();
        self.tracing = Some(TracingConfig {
            otlp_endpoint: endpoint.map(str::to_string),
            ..config
        });
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();

        let service_name = self.service_name.unwrap_or(defaults.service_name);
        let service_version = self.service_version.unwrap_or(defaults.service_version);

        let metrics = defaults.metrics;

        let mut tracing = self.tracing.unwrap_or(defaults.tracing);
        tracing.service_name = service_name.clone();
        tracing.service_version = service_version.clone();

        let logging = self.logging.unwrap_or(defaults.logging);

        TelemetryConfig {
            service_name,
            service_version,
            metrics,
            tracing,
            logging,
        }
    }
}
