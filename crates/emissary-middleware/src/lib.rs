//! # Emissary Middleware
//!
//! Middleware pipeline implementation for the Emissary framework.
//!
//! Every dispatched message flows through an ordered list of middleware
//! before it reaches its handler:
//!
//! ```text
//! caller → [sender pipeline: M1 → M2 → ...] → transport
//!        → [receiver pipeline: R1 → R2 → ...] → handler
//! ```
//!
//! Each middleware decides how often it calls the rest of the chain: zero
//! times to short-circuit with its own response, once to pass through, or
//! several times to retry.
//!
//! ## Building Blocks
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Middleware`] | A middleware for one message type (or, generically, for all) |
//! | [`MiddlewareContext`] | What a middleware sees: message, configuration, token, next step |
//! | [`MiddlewareRegistry`] | The middleware types an application registered |
//! | [`PipelineBuilder`] | Ordered, mutable list of middleware with their configuration |
//! | [`Pipeline`] | Immutable execution plan produced by [`PipelineBuilder::build`] |
//!
//! ## Example
//!
//! ```ignore
//! use emissary_middleware::{Middleware, MiddlewareContext};
//! use emissary_core::{BoxFuture, DispatchResult, Message};
//!
//! struct Retry;
//!
//! impl<M: Message> Middleware<M> for Retry {
//!     type Configuration = u32;
//!
//!     fn execute(&self, ctx: MiddlewareContext<M, u32>) -> BoxFuture<'_, DispatchResult<M::Response>> {
//!         Box::pin(async move {
//!             let mut attempt = 0;
//!             loop {
//!                 match ctx.proceed().await {
//!                     Err(_) if attempt < *ctx.configuration() => attempt += 1,
//!                     other => return other,
//!                 }
//!             }
//!         })
//!     }
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/emissary-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod stages;

pub use middleware::{Middleware, MiddlewareContext, Next};
pub use pipeline::{terminal, MiddlewareDescriptor, Pipeline, PipelineBuilder, Terminal};
pub use registry::{MiddlewareRegistration, MiddlewareRegistry};
pub use stages::logging::{
    LogHook, LogRecord, LoggingConfiguration, LoggingMiddleware, LoggingPipelineExt,
};
