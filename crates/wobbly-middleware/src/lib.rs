//! # Wobbly Middleware
//!
//! Composable request pipeline for the wobbly service.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] applied around a
//! terminal [`Handler`]. The first stage is the outermost wrapper. The
//! unstable route nests its stages as:
//!
//! ```text
//! span → timing → counting → correlation → fault → delay → Stabler
//! ```
//!
//! so the span and latency include injected delay, every request is counted,
//! and the fault and delay stages already log under the correlation id.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wobbly_middleware::{handler_fn, Pipeline, Response, ResponseExt};
//! use wobbly_middleware::stages::CorrelationMiddleware;
//!
//! let pipeline = Pipeline::builder()
//!     .stage(CorrelationMiddleware::default())
//!     .build();
//!
//! let handler = pipeline.wrap(Arc::new(handler_fn(|_ctx, _req| async {
//!     Response::text(http::StatusCode::OK, "hello world")
//! })));
//! assert_eq!(pipeline.stage_names(), vec!["correlation"]);
//! # drop(handler);
//! ```

#![doc(html_root_url = "https://docs.rs/wobbly-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod pipeline;
pub mod random;
pub mod stages;
pub mod types;

pub use middleware::{handler_fn, BoxFuture, FnHandler, FnMiddleware, Handler, Middleware, Next};
pub use pipeline::{wrap, BoxedHandler, BoxedMiddleware, Pipeline, PipelineBuilder};
pub use random::{FixedRandom, RandomSource, SeededRandom, ThreadRandom};
pub use types::{Request, Response, ResponseExt};
