//! Message handlers.
//!
//! Handlers come in two shapes:
//!
//! - **Typed**: a type implementing [`Handler<M>`], resolved from the
//!   service scope for every message
//! - **Delegate**: an async closure taking the message, the scope, and the
//!   cancellation token
//!
//! Both are adapted to [`DynHandler<M>`], the object-safe form the
//! dispatch machinery works with.
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct CreateUserHandler;
//!
//! impl Handler<CreateUser> for CreateUserHandler {
//!     async fn handle(&self, message: CreateUser, _: CancellationToken) -> DispatchResult<UserCreated> {
//!         Ok(UserCreated { id: message.id })
//!     }
//!
//!     fn configure_pipeline(pipeline: &mut PipelineBuilder<CreateUser>) -> DispatchResult<()> {
//!         pipeline.use_logging_defaults()?;
//!         Ok(())
//!     }
//! }
//! ```

use emissary_core::{
    di::ServiceScope, BoxFuture, CancellationToken, DispatchResult, Message,
};
use emissary_middleware::PipelineBuilder;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handles messages of type `M`.
pub trait Handler<M: Message>: Send + Sync + 'static {
    /// Handles one message.
    fn handle(
        &self,
        message: M,
        cancellation: CancellationToken,
    ) -> impl Future<Output = DispatchResult<M::Response>> + Send;

    /// Adds the receiver-side middleware for this handler.
    ///
    /// Called every time a message is dispatched to this handler, with a
    /// builder bound to the receiving transport.
    fn configure_pipeline(pipeline: &mut PipelineBuilder<M>) -> DispatchResult<()>
    where
        Self: Sized,
    {
        let _ = pipeline;
        Ok(())
    }
}

/// Receiver-side pipeline configuration of a delegate handler.
pub type PipelineConfigurator<M> =
    Arc<dyn Fn(&mut PipelineBuilder<M>) -> DispatchResult<()> + Send + Sync>;

/// Object-safe form of a handler.
pub trait DynHandler<M: Message>: Send + Sync {
    /// Name of the handler, for errors and logs.
    fn handler_type(&self) -> &'static str;

    /// Returns `true` if this handler configures a receiver pipeline.
    fn has_pipeline(&self) -> bool;

    /// Adds the handler's receiver-side middleware to `pipeline`.
    fn configure_pipeline(&self, pipeline: &mut PipelineBuilder<M>) -> DispatchResult<()>;

    /// Handles `message` with services from `scope`.
    fn handle_dyn(
        &self,
        scope: &ServiceScope,
        message: M,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, DispatchResult<M::Response>>;
}

/// Adapter for a typed handler resolved from the scope.
pub(crate) struct TypedHandler<M, H> {
    _marker: PhantomData<fn(M) -> H>,
}

impl<M, H> TypedHandler<M, H> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M, H> DynHandler<M> for TypedHandler<M, H>
where
    M: Message,
    H: Handler<M>,
{
    fn handler_type(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    // The static hook always exists, even when it adds nothing.
    fn has_pipeline(&self) -> bool {
        true
    }

    fn configure_pipeline(&self, pipeline: &mut PipelineBuilder<M>) -> DispatchResult<()> {
        H::configure_pipeline(pipeline)
    }

    fn handle_dyn(
        &self,
        scope: &ServiceScope,
        message: M,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, DispatchResult<M::Response>> {
        let handler = scope.resolve_required::<H>();
        Box::pin(async move {
            let handler = handler?;
            handler.handle(message, cancellation).await
        })
    }
}

/// Adapter for a delegate handler.
pub struct FnHandler<M: Message, F> {
    handler: F,
    pipeline: Option<PipelineConfigurator<M>>,
}

impl<M, F, Fut> FnHandler<M, F>
where
    M: Message,
    F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
{
    /// Wraps `handler`.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            pipeline: None,
        }
    }

    /// Sets the receiver pipeline configuration.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfigurator<M>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

impl<M, F, Fut> DynHandler<M> for FnHandler<M, F>
where
    M: Message,
    F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
{
    fn handler_type(&self) -> &'static str {
        std::any::type_name::<F>()
    }

    fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    fn configure_pipeline(&self, pipeline: &mut PipelineBuilder<M>) -> DispatchResult<()> {
        match &self.pipeline {
            Some(configure) => configure(pipeline),
            None => Ok(()),
        }
    }

    fn handle_dyn(
        &self,
        scope: &ServiceScope,
        message: M,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, DispatchResult<M::Response>> {
        Box::pin((self.handler)(message, scope.clone(), cancellation))
    }
}

impl<M: Message, F> std::fmt::Debug for FnHandler<M, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler")
            .field("message_type", &M::type_name())
            .field("has_pipeline", &self.pipeline.is_some())
            .finish()
    }
}
