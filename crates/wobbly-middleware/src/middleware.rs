//! Core handler and middleware traits.
//!
//! A [`Handler`] turns a request into a response. A [`Middleware`] wraps the
//! rest of the chain, reaching it through [`Next`], and may run code before
//! and after delegating. Both receive the [`ExecutionContext`] by value; a
//! stage that enriches the context hands a derived copy downstream and never
//! sees its own changes leak back upstream.
//!
//! # Example
//!
//! ```ignore
//! use wobbly_middleware::{BoxFuture, Middleware, Next, Request, Response};
//! use wobbly_core::ExecutionContext;
//!
//! struct Logging;
//!
//! impl Middleware for Logging {
//!     fn name(&self) -> &'static str {
//!         "logging"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: ExecutionContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             tracing::info!(uri = %request.uri(), "before");
//!             let response = next.run(ctx, request).await;
//!             tracing::info!(status = response.status().as_u16(), "after");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use wobbly_core::ExecutionContext;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal request handler.
///
/// Handlers are shared across concurrent requests and must not keep
/// per-request state in `self`.
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for `request`.
    fn call<'a>(&'a self, ctx: ExecutionContext, request: Request) -> BoxFuture<'a, Response>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, ctx: ExecutionContext, request: Request) -> BoxFuture<'a, Response> {
        (**self).call(ctx, request)
    }
}

/// A decorator around the rest of the chain.
///
/// # Invariants
///
/// - Middleware calls `next.run()` at most once; not calling it short-circuits
///   the chain with the middleware's own response
/// - Middleware never reorders or mutates the pipeline it belongs to
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage, used in logs and introspection.
    fn name(&self) -> &'static str;

    /// Processes the request, delegating to `next` as needed.
    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// The remainder of the chain after the current middleware.
///
/// `Next` is consumed by [`Next::run`], so it can only be invoked once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(&'a dyn Handler),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that invokes `middleware`, then `next`.
    pub fn new(middleware: &'a dyn Middleware, next: Self) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes `handler`.
    pub fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// Invokes the next middleware or the terminal handler.
    pub async fn run(self, ctx: ExecutionContext, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler.call(ctx, request).await,
        }
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```ignore
/// let timing = FnMiddleware::new("timing", |ctx, req, next| {
///     Box::pin(async move {
///         let start = Instant::now();
///         let response = next.run(ctx, req).await;
///         tracing::debug!(elapsed = ?start.elapsed(), "done");
///         response
///     })
/// });
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(ExecutionContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    /// Creates a new closure-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(ExecutionContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: ExecutionContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        (self.func)(ctx, request, next)
    }
}

/// A handler built from an async closure.
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(ExecutionContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: ExecutionContext, request: Request) -> BoxFuture<'a, Response> {
        Box::pin((self.func)(ctx, request))
    }
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(ExecutionContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnHandler { func }
}
