//! Service configuration.
//!
//! Configuration is read from the environment. Every setting has a default;
//! an absent or unparsable value falls back to it and produces a warning.
//! Listener addresses and the stable URL are stricter: a value that is set
//! but invalid is a fatal [`ServiceError::Configuration`].
//!
//! Logging is not installed yet while the configuration loads, so warnings are
//! returned to the caller instead of being logged here.
//!
//! # Example
//!
//! ```rust
//! use wobbly_server::ServiceConfig;
//!
//! let (config, warnings) = ServiceConfig::from_lookup(|key| match key {
//!     "WOBBLY_HTTP_ADDR" => Some("127.0.0.1:3000".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//!
//! assert_eq!(config.http_addr.port(), 3000);
//! assert!(!warnings.is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Debug, Display};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use wobbly_core::{CorrelationIdGenerator, ServiceError, ServiceResult};
use wobbly_middleware::stages::FaultMode;
use wobbly_telemetry::{LogConfig, LogFormat, TelemetryConfig};

/// Logic listener address.
pub const ENV_HTTP_ADDR: &str = "WOBBLY_HTTP_ADDR";
/// Prometheus listener address.
pub const ENV_METRICS_ADDR: &str = "WOBBLY_METRICS_ADDR";
/// URL called by the HTTP Stabler.
pub const ENV_STABLE_URL: &str = "WOBBLY_STABLE_URL";
/// Stabler variant, `http` or `direct`.
pub const ENV_STABLER: &str = "WOBBLY_STABLER";
/// Probability of an injected fault on `/unstable`.
pub const ENV_FAULT_PROBABILITY: &str = "WOBBLY_FAULT_PROBABILITY";
/// Exclusive upper bound of the injected delay, in milliseconds.
pub const ENV_MAX_DELAY_MS: &str = "WOBBLY_MAX_DELAY_MS";
/// Client timeout of the HTTP Stabler, in milliseconds.
pub const ENV_UPSTREAM_TIMEOUT_MS: &str = "WOBBLY_UPSTREAM_TIMEOUT_MS";
/// Grace window for draining connections and flushing exporters, in seconds.
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "WOBBLY_SHUTDOWN_GRACE_SECS";
/// Correlation id generator, `uuid` or `timestamp`.
pub const ENV_CORRELATION_ID: &str = "WOBBLY_CORRELATION_ID";
/// OTLP collector endpoint.
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Log layout, `json` or `pretty`.
pub const ENV_LOG_FORMAT: &str = "WOBBLY_LOG_FORMAT";

/// Default stable URL.
pub const DEFAULT_STABLE_URL: &str = "http://localhost:8080/stable";
/// Default injected delay bound in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 1000;
/// Default shutdown grace in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// How `/unstable` obtains the stable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StablerKind {
    /// GET `/stable` over HTTP.
    #[default]
    Http,
    /// Call the stable logic in-process.
    Direct,
}

impl FromStr for StablerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown stabler: {other}")),
        }
    }
}

impl fmt::Display for StablerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logic listener serving `/stable` and `/unstable`.
    pub http_addr: SocketAddr,

    /// Prometheus listener serving `/metrics`.
    pub metrics_addr: SocketAddr,

    /// URL called by the HTTP Stabler.
    pub stable_url: String,

    /// Stabler variant.
    pub stabler: StablerKind,

    /// Probability of an injected fault. Zero disables injection.
    pub fault_probability: f64,

    /// Exclusive upper bound of the injected delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Client timeout of the HTTP Stabler, in milliseconds. `None` waits forever.
    pub upstream_timeout_ms: Option<u64>,

    /// Grace window for shutdown, in seconds.
    pub shutdown_grace_secs: u64,

    /// Fallback correlation id generator.
    pub correlation_ids: CorrelationIdGenerator,

    /// OTLP collector endpoint. Spans are only exported when set.
    pub otlp_endpoint: Option<String>,

    /// Log layout.
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            stable_url: DEFAULT_STABLE_URL.to_string(),
            stabler: StablerKind::Http,
            fault_probability: 0.0,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            upstream_timeout_ms: None,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            correlation_ids: CorrelationIdGenerator::Uuid,
            otlp_endpoint: None,
            log_format: LogFormat::Json,
        }
    }
}

impl ServiceConfig {
    /// Loads the configuration from the process environment.
    ///
    /// Returns the configuration and the warnings produced while loading it.
    pub fn from_env() -> ServiceResult<(Self, Vec<String>)> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ServiceResult<(Self, Vec<String>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut env = EnvReader {
            lookup,
            warnings: Vec::new(),
        };

        let config = Self {
            http_addr: env.strict(ENV_HTTP_ADDR, defaults.http_addr)?,
            metrics_addr: env.strict(ENV_METRICS_ADDR, defaults.metrics_addr)?,
            stable_url: env.strict(ENV_STABLE_URL, defaults.stable_url)?,
            stabler: env.lenient(ENV_STABLER, defaults.stabler),
            fault_probability: env.lenient(ENV_FAULT_PROBABILITY, defaults.fault_probability),
            max_delay_ms: env.lenient(ENV_MAX_DELAY_MS, defaults.max_delay_ms),
            upstream_timeout_ms: env.optional(
                ENV_UPSTREAM_TIMEOUT_MS,
                "calls to /stable have no timeout and can block /unstable indefinitely",
            ),
            shutdown_grace_secs: env.lenient(ENV_SHUTDOWN_GRACE_SECS, defaults.shutdown_grace_secs),
            correlation_ids: env.lenient(ENV_CORRELATION_ID, defaults.correlation_ids),
            otlp_endpoint: env.optional(ENV_OTLP_ENDPOINT, "spans will not be exported"),
            log_format: env.lenient(ENV_LOG_FORMAT, defaults.log_format),
        };

        config.validate()?;
        Ok((config, env.warnings))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ServiceResult<()> {
        let url = reqwest::Url::parse(&self.stable_url).map_err(|e| {
            ServiceError::configuration(format!("invalid stable url {:?}: {e}", self.stable_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ServiceError::configuration(format!(
                "stable url must be http or https, got {:?}",
                self.stable_url
            )));
        }

        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(ServiceError::configuration(format!(
                "fault probability must be within [0, 1], got {}",
                self.fault_probability
            )));
        }

        Ok(())
    }

    /// Returns the injected delay bound.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Returns the HTTP Stabler client timeout.
    #[must_use]
    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the shutdown grace window.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Returns the fault injection mode for `/unstable`.
    #[must_use]
    pub fn fault_mode(&self) -> FaultMode {
        FaultMode::from_probability(self.fault_probability)
    }

    /// Returns the telemetry configuration derived from this configuration.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig::builder()
            .service_name("wobbly")
            .service_version(env!("CARGO_PKG_VERSION"))
            .logging(LogConfig::production().with_format(self.log_format))
            .otlp_endpoint(self.otlp_endpoint.as_deref())
            .build()
    }
}

/// Reads variables and collects warnings.
struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Absent or unparsable values fall back to `default`.
    fn lenient<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + Debug,
        T::Err: Display,
    {
        match self.raw(key) {
            None => {
                self.warnings
                    .push(format!("{key} not set, defaulting to {default:?}"));
                default
            }
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(e) => {
                    self.warnings.push(format!(
                        "{key}={raw:?} is invalid ({e}), defaulting to {default:?}"
                    ));
                    default
                }
            },
        }
    }

    /// Absent values fall back to `default`; unparsable ones are fatal.
    fn strict<T>(&mut self, key: &str, default: T) -> ServiceResult<T>
    where
        T: FromStr + Debug,
        T::Err: Display,
    {
        match self.raw(key) {
            None => {
                self.warnings
                    .push(format!("{key} not set, defaulting to {default:?}"));
                Ok(default)
            }
            Some(raw) => raw
                .parse()
                .map_err(|e| ServiceError::configuration(format!("{key}={raw:?}: {e}"))),
        }
    }

    /// Absent or unparsable values leave the setting off.
    fn optional<T>(&mut self, key: &str, consequence: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            None => {
                self.warnings.push(format!("{key} not set, {consequence}"));
                None
            }
            Some(raw) => match raw.parse() {
                Ok(value) => Some(value),
                Err(e) => {
                    self.warnings
                        .push(format!("{key}={raw:?} is invalid ({e}), {consequence}"));
                    None
                }
            },
        }
    }
}
