//! Sources of the stable response.
//!
//! `/unstable` never builds its body itself. It asks a [`Stabler`], which
//! may answer in-process ([`DirectStabler`]) or by calling `/stable` over HTTP
//! ([`HttpStabler`]). [`TracedStabler`] wraps either one in a span. All
//! variants are interchangeable behind the trait, which is also the seam
//! used by test doubles.

mod direct;
mod remote;
mod traced;

pub use self::direct::DirectStabler;
pub use self::remote::{HttpStabler, ReqwestBody, ReqwestTransport, Transport, UpstreamBody};
pub use self::traced::{TracedStabler, STABLER_SPAN};

use std::sync::Arc;
use wobbly_core::{ExecutionContext, UpstreamError};
use wobbly_middleware::BoxFuture;

/// Fetches the canonical stable response.
pub trait Stabler: Send + Sync + 'static {
    /// Returns the stable body, or the reason it could not be obtained.
    fn stable<'a>(&'a self, ctx: &'a ExecutionContext)
        -> BoxFuture<'a, Result<String, UpstreamError>>;
}

impl<S: Stabler + ?Sized> Stabler for Arc<S> {
    fn stable<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<String, UpstreamError>> {
        (**self).stable(ctx)
    }
}

/// A shared, type-erased [`Stabler`].
pub type BoxedStabler = Arc<dyn Stabler>;
