//! # Wobbly Server
//!
//! A small HTTP service that produces interesting telemetry on purpose.
//!
//! - `GET /stable` always answers 200 `hello world`
//! - `GET /unstable` fetches the same body through a [`Stabler`], after an
//!   optional coin-flip failure and a random delay
//! - `GET /metrics` on a separate listener exposes Prometheus metrics
//!
//! ## Running
//!
//! ```text
//! WOBBLY_HTTP_ADDR=0.0.0.0:8080 \
//! WOBBLY_FAULT_PROBABILITY=0.5 \
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! wobbly
//! ```
//!
//! See [`config`] for every variable.

#![doc(html_root_url = "https://docs.rs/wobbly-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod stabler;

pub use app::App;
pub use config::{ServiceConfig, StablerKind};
pub use error::{ServerError, ServerResult};
pub use handlers::{StableHandler, UnstableHandler};
pub use router::{LogicRouter, LogicRoutes, MetricsRouter};
pub use server::Server;
pub use shutdown::{ShutdownReceiver, ShutdownSignal};
pub use stabler::{
    BoxedStabler, DirectStabler, HttpStabler, ReqwestTransport, Stabler, TracedStabler,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
