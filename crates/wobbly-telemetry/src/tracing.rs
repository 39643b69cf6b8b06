//! OpenTelemetry distributed tracing for wobbly.
//!
//! A tracer provider is always installed so that spans carry real trace and
//! span ids, which the correlation logs and exemplars reference. Spans leave
//! the process only when an OTLP endpoint is configured.
//!
//! W3C trace context (`traceparent`) is installed as the global propagator.
//! [`extract_context`] and [`inject_context`] move it across HTTP hops.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether a tracer provider is installed at all.
    pub enabled: bool,

    /// OTLP gRPC endpoint (e.g., `http://localhost:4317`). `None` keeps spans in-process.
    pub otlp_endpoint: Option<String>,

    /// Service name for the trace resource.
    pub service_name: String,

    /// Service version for the trace resource.
    pub service_version: String,

    /// Sampling ratio (0.0 to 1.0).
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: None,
            service_name: "wobbly".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            sample_ratio: 1.0,
        }
    }
}

fn sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Installs the global propagator and tracer provider.
///
/// Returns the provider so the caller can flush and shut it down.
///
/// # Errors
///
/// Returns `TelemetryError::TracingInit` if the OTLP exporter cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    if !config.enabled {
        return Ok(None);
    }

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
    ]);

    let mut builder = TracerProvider::builder()
        .with_sampler(sampler(config.sample_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;
        builder = builder.with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio);
        tracing::info!(endpoint = %endpoint, "exporting spans over otlp");
    }

    let provider = builder.build();
    global::set_tracer_provider(provider.clone());

    Ok(Some(provider))
}

/// Extracts a remote parent from inbound headers on top of `parent`.
///
/// When the headers carry no valid trace context, `parent` is returned as is.
pub fn extract_context(
    parent: &opentelemetry::Context,
    headers: &http::HeaderMap,
) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract_with_context(parent, &HeaderExtractor(headers))
    })
}

/// Writes the span active in `context` into outbound headers.
pub fn inject_context(context: &opentelemetry::Context, headers: &mut http::HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(context, &mut HeaderInjector(headers));
    });
}

/// Header extractor for `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// Header injector for `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}
