//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that every middleware
//! implements, the [`MiddlewareContext`] a middleware receives, and the
//! [`Next`] step that continues the chain.
//!
//! A middleware is either written for one message type or generically for
//! all of them:
//!
//! ```ignore
//! struct Timing;
//!
//! impl<M: Message> Middleware<M> for Timing {
//!     type Configuration = ();
//!
//!     fn execute(&self, ctx: MiddlewareContext<M, ()>) -> BoxFuture<'_, DispatchResult<M::Response>> {
//!         Box::pin(async move {
//!             let started = Instant::now();
//!             let result = ctx.proceed().await;
//!             tracing::debug!(elapsed = ?started.elapsed(), "message handled");
//!             result
//!         })
//!     }
//! }
//! ```

use crate::pipeline::{PipelineEntry, Terminal};
use emissary_core::{
    has_unit_response, di::ServiceScope, BoxFuture, CancellationToken, DispatchContext,
    DispatchResult, Message, TransportType,
};
use std::any::Any;
use std::sync::Arc;

/// A middleware for messages of type `M`.
///
/// Middleware instances are resolved from the service scope each time the
/// pipeline runs, so register them with the container alongside the
/// middleware registry. Per-use settings live in
/// [`Configuration`](Middleware::Configuration) and are stored in the
/// pipeline, not in the middleware itself.
///
/// # Invariants
///
/// - Errors from downstream must be returned, not swallowed, unless the
///   middleware deliberately recovers from them
/// - The chain may be continued zero, one, or several times
pub trait Middleware<M: Message>: Send + Sync + 'static {
    /// Settings stored per pipeline entry.
    type Configuration: Send + Sync + 'static;

    /// Runs this middleware.
    ///
    /// Call [`MiddlewareContext::next`] or [`MiddlewareContext::proceed`] to
    /// continue to the next middleware (or to the handler at the end of the
    /// chain).
    fn execute(
        &self,
        ctx: MiddlewareContext<M, Self::Configuration>,
    ) -> BoxFuture<'_, DispatchResult<M::Response>>;
}

/// What a running middleware sees.
pub struct MiddlewareContext<M: Message, C> {
    message: M,
    configuration: Arc<C>,
    cancellation: CancellationToken,
    next: Next<M>,
    scope: ServiceScope,
    context: DispatchContext,
    transport: TransportType,
}

impl<M: Message, C> MiddlewareContext<M, C> {
    /// The message as it arrived at this middleware.
    pub fn message(&self) -> &M {
        &self.message
    }

    /// This middleware's configuration in the current pipeline.
    pub fn configuration(&self) -> &C {
        &self.configuration
    }

    /// The token passed to this middleware.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The scope the pipeline runs in.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// The active dispatch context.
    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// The transport this pipeline is attached to.
    pub fn transport(&self) -> &TransportType {
        &self.transport
    }

    /// Returns `true` if the message produces no response.
    pub fn has_unit_response(&self) -> bool {
        has_unit_response::<M>()
    }

    /// Continues the chain with `message` and `cancellation`.
    ///
    /// May be called more than once. The returned future does not borrow
    /// the context.
    pub fn next(
        &self,
        message: M,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, DispatchResult<M::Response>> {
        self.next.run(message, cancellation)
    }

    /// Continues the chain with the received message and token.
    pub fn proceed(&self) -> BoxFuture<'static, DispatchResult<M::Response>> {
        self.next(self.message.clone(), self.cancellation.clone())
    }
}

impl<M: Message, C> std::fmt::Debug for MiddlewareContext<M, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareContext")
            .field("message_type", &M::type_name())
            .field("position", &self.next.index)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Everything a type-erased middleware invoker needs for one call.
pub(crate) struct Invocation<M: Message> {
    pub(crate) message: M,
    pub(crate) cancellation: CancellationToken,
    pub(crate) configuration: Arc<dyn Any + Send + Sync>,
    pub(crate) next: Next<M>,
    pub(crate) scope: ServiceScope,
    pub(crate) context: DispatchContext,
    pub(crate) transport: TransportType,
}

impl<M: Message> Invocation<M> {
    pub(crate) fn into_context<C>(self, configuration: Arc<C>) -> MiddlewareContext<M, C> {
        MiddlewareContext {
            message: self.message,
            configuration,
            cancellation: self.cancellation,
            next: self.next,
            scope: self.scope,
            context: self.context,
            transport: self.transport,
        }
    }
}

/// State shared by every step of one pipeline execution.
pub(crate) struct Chain<M: Message> {
    pub(crate) entries: Arc<[PipelineEntry<M>]>,
    pub(crate) terminal: Terminal<M>,
    pub(crate) scope: ServiceScope,
    pub(crate) context: DispatchContext,
    pub(crate) transport: TransportType,
}

/// The remainder of a pipeline, starting at one position.
///
/// Unlike a one-shot callback, `Next` can run any number of times; each run
/// starts the remainder of the chain afresh.
pub struct Next<M: Message> {
    chain: Arc<Chain<M>>,
    index: usize,
}

impl<M: Message> Clone for Next<M> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            index: self.index,
        }
    }
}

impl<M: Message> Next<M> {
    pub(crate) fn start(chain: Chain<M>) -> Self {
        Self {
            chain: Arc::new(chain),
            index: 0,
        }
    }

    /// Position of the middleware this step runs; equal to the pipeline
    /// length when it runs the terminal.
    pub fn position(&self) -> usize {
        self.index
    }

    /// Runs the middleware at this position, or the terminal past the end.
    ///
    /// The message becomes the context's current message before the step
    /// runs, and a successful response becomes its current response.
    pub fn run(
        &self,
        message: M,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, DispatchResult<M::Response>> {
        let chain = Arc::clone(&self.chain);
        let index = self.index;

        Box::pin(async move {
            chain.context.set_current_message(&message);

            let result = match chain.entries.get(index) {
                None => {
                    tracing::trace!(message_type = M::type_name(), "invoking pipeline terminal");
                    (chain.terminal)(message, cancellation).await
                }
                Some(entry) => {
                    tracing::trace!(
                        message_type = M::type_name(),
                        middleware = entry.type_name(),
                        position = index,
                        "executing middleware"
                    );
                    let invocation = Invocation {
                        message,
                        cancellation,
                        configuration: Arc::clone(&entry.configuration),
                        next: Self {
                            chain: Arc::clone(&chain),
                            index: index + 1,
                        },
                        scope: chain.scope.clone(),
                        context: chain.context.clone(),
                        transport: chain.transport.clone(),
                    };
                    (entry.invoker)(invocation).await
                }
            };

            if let Ok(response) = &result {
                chain.context.set_current_response::<M>(response);
            }

            result
        })
    }
}

impl<M: Message> std::fmt::Debug for Next<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("position", &self.index)
            .field("remaining", &self.chain.entries.len().saturating_sub(self.index))
            .finish()
    }
}
