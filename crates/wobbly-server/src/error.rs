//! Error types for the wobbly server.

use std::net::SocketAddr;
use thiserror::Error;
use wobbly_core::ServiceError;
use wobbly_telemetry::TelemetryError;

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("could not bind {listener} listener to {addr}: {source}")]
    Bind {
        /// Which listener failed (`logic` or `metrics`).
        listener: &'static str,
        /// Requested address.
        addr: SocketAddr,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or a failed component.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Telemetry could not be set up.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// I/O failure on an already bound listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`ServerError`].
pub type ServerResult<T> = Result<T, ServerError>;
