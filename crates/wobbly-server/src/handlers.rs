//! Terminal handlers for `/stable` and `/unstable`.

use crate::stabler::BoxedStabler;
use http::StatusCode;
use wobbly_core::{ExecutionContext, ServiceError};
use wobbly_middleware::{BoxFuture, Handler, Request, Response, ResponseExt};
use wobbly_telemetry::logging::fields;

/// Body returned by `/stable`.
pub const STABLE_BODY: &str = "hello world";

/// The stable logic: logs the event and returns [`STABLE_BODY`].
///
/// Shared by [`StableHandler`] and the in-process Stabler.
pub fn stable_body(_ctx: &ExecutionContext) -> &'static str {
    tracing::info!("handling stable");
    STABLE_BODY
}

/// Answers every request with 200 and [`STABLE_BODY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StableHandler;

impl Handler for StableHandler {
    fn call<'a>(&'a self, ctx: ExecutionContext, _request: Request) -> BoxFuture<'a, Response> {
        Box::pin(async move { Response::text(StatusCode::OK, stable_body(&ctx)) })
    }
}

/// Relays the body obtained from a Stabler.
///
/// Any Stabler error becomes an empty 500.
#[derive(Clone)]
pub struct UnstableHandler {
    stabler: BoxedStabler,
}

impl UnstableHandler {
    /// Creates the handler.
    pub fn new(stabler: BoxedStabler) -> Self {
        Self { stabler }
    }
}

impl std::fmt::Debug for UnstableHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnstableHandler").finish_non_exhaustive()
    }
}

impl Handler for UnstableHandler {
    fn call<'a>(&'a self, ctx: ExecutionContext, _request: Request) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.stabler.stable(&ctx).await {
                Ok(body) => {
                    tracing::debug!(
                        { fields::HTTP_STATUS } = StatusCode::OK.as_u16(),
                        { fields::BODY_BYTES } = body.len(),
                        "sent response"
                    );
                    Response::text(StatusCode::OK, body)
                }
                Err(e) => {
                    let err = ServiceError::from(e);
                    tracing::error!({ fields::ERROR } = %err, "could not get stable response");
                    Response::empty(err.status_code())
                }
            }
        })
    }
}
