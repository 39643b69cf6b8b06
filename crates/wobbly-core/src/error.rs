//! Error types for wobbly.
//!
//! | Error | Origin | Handling |
//! |---|---|---|
//! | [`ServiceError::Configuration`] | bad address or URL at startup | fatal |
//! | [`ServiceError::Upstream`] | dial/read failure calling `/stable` | HTTP 500 |
//! | [`ServiceError::InjectedFault`] | synthetic failure | HTTP 500 |
//! | [`ServiceError::ResourceRelease`] | response body could not be released | logged only |
//!
//! Callers only ever observe 200, 404 or 500. No error body is produced.

use http::StatusCode;
use thiserror::Error;

/// Result type alias using [`ServiceError`].
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure while fetching the stable response from its source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The internal endpoint could not be reached.
    #[error("could not send get request to {url}: {message}")]
    Dial {
        /// Target URL.
        url: String,
        /// Underlying cause.
        message: String,
    },

    /// The response body could not be fully read.
    #[error("could not read response bytes: {message}")]
    Read {
        /// Underlying cause.
        message: String,
    },

    /// The internal endpoint answered with a non-2xx status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Target URL.
        url: String,
        /// Status code received.
        status: u16,
    },
}

impl UpstreamError {
    /// Creates a dial error.
    pub fn dial(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dial {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }
}

/// Standard error type for wobbly.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid configuration, fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Upstream call failed.
    #[error("upstream call failed: {0}")]
    Upstream(#[from] UpstreamError),

    /// Deliberate synthetic failure.
    #[error("injected fault")]
    InjectedFault,

    /// A resource could not be released after the response was produced.
    #[error("could not release resource: {0}")]
    ResourceRelease(String),
}

impl ServiceError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the HTTP status reported to callers for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Returns `true` if the process cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
