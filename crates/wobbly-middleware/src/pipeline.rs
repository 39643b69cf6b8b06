//! Ordered middleware composition.
//!
//! A [`Pipeline`] is an ordered list of middleware. Applied to a handler `H`
//! with stages `[M1, M2, ..., Mn]` it behaves as `M1(M2(...Mn(H)))`: the first
//! stage is the outermost wrapper, so it runs its "before" logic first and its
//! "after" logic last.
//!
//! ```text
//! Request → M1 → M2 → ... → Mn → Handler
//!                                   ↓
//! Response ← M1 ← M2 ← ... ← Mn ←───┘
//! ```
//!
//! Composition is associative: wrapping an already wrapped handler with more
//! stages is the same as wrapping the bare handler with the concatenated list.

use crate::middleware::{BoxFuture, Handler, Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;
use wobbly_core::ExecutionContext;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A type-erased, shareable handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// An immutable, ordered list of middleware stages.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder()
///     .stage(SpanMiddleware::new("http-stable"))
///     .stage(CorrelationMiddleware::default())
///     .build();
///
/// let handler = pipeline.wrap(Arc::new(StableHandler));
/// ```
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[BoxedMiddleware]>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Creates a pipeline from an ordered list of stages, outermost first.
    #[must_use]
    pub fn new(stages: Vec<BoxedMiddleware>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Runs `request` through every stage and then `handler`.
    pub async fn process(
        &self,
        ctx: ExecutionContext,
        request: Request,
        handler: &dyn Handler,
    ) -> Response {
        build_chain(&self.stages, handler).run(ctx, request).await
    }

    /// Composes the stages around `handler` into a single handler.
    ///
    /// An empty pipeline returns `handler` itself.
    #[must_use]
    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        if self.stages.is_empty() {
            return handler;
        }
        Arc::new(Composed {
            stages: Arc::clone(&self.stages),
            handler,
        })
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Composes `middleware` around `handler`, first element outermost.
///
/// Shorthand for `Pipeline::new(middleware).wrap(handler)`.
#[must_use]
pub fn wrap(handler: BoxedHandler, middleware: Vec<BoxedMiddleware>) -> BoxedHandler {
    Pipeline::new(middleware).wrap(handler)
}

fn build_chain<'a>(stages: &'a [BoxedMiddleware], handler: &'a dyn Handler) -> Next<'a> {
    stages
        .iter()
        .rev()
        .fold(Next::handler(handler), |next, middleware| {
            Next::new(middleware.as_ref(), next)
        })
}

/// A handler with its stages applied.
struct Composed {
    stages: Arc<[BoxedMiddleware]>,
    handler: BoxedHandler,
}

impl Handler for Composed {
    fn call<'a>(&'a self, ctx: ExecutionContext, request: Request) -> BoxFuture<'a, Response> {
        Box::pin(build_chain(&self.stages, self.handler.as_ref()).run(ctx, request))
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Stages added first wrap those added later.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared stage.
    #[must_use]
    pub fn shared_stage(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline::new(self.stages)
    }
}
