use super::Stabler;
use crate::handlers::stable_body;
use wobbly_core::{ExecutionContext, UpstreamError};
use wobbly_middleware::BoxFuture;

/// Runs the stable logic in-process, bypassing HTTP.
///
/// Only valid when `/stable` is served by the same process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStabler;

impl Stabler for DirectStabler {
    fn stable<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<String, UpstreamError>> {
        Box::pin(async move { Ok(stable_body(ctx).to_string()) })
    }
}
