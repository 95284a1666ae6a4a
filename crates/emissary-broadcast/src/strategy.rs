//! The broadcasting strategy seam.

use crate::{FailurePolicy, ParallelBroadcastingStrategy, SequentialBroadcastingStrategy};
use async_trait::async_trait;
use emissary_config::{BroadcastingConfig, BroadcastingMode};
use emissary_core::{
    di::ServiceScope, BoxFuture, CancellationToken, DispatchResult, Message, TransportType,
};
use std::any::Any;
use std::sync::Arc;

type InvokeFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, DispatchResult<()>> + Send + Sync>;

/// Runs one handler of an event notification.
///
/// An invoker can be called any number of times; each call runs the
/// handler's receiver pipeline once, in its own forked context.
#[derive(Clone)]
pub struct HandlerInvoker {
    handler_type: &'static str,
    invoke: InvokeFn,
}

impl HandlerInvoker {
    /// Creates an invoker for `handler_type`.
    pub fn new<F>(handler_type: &'static str, invoke: F) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, DispatchResult<()>> + Send + Sync + 'static,
    {
        Self {
            handler_type,
            invoke: Arc::new(invoke),
        }
    }

    /// Name of the handler this invoker runs.
    #[must_use]
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Runs the handler.
    pub fn invoke(&self, cancellation: CancellationToken) -> BoxFuture<'static, DispatchResult<()>> {
        (self.invoke)(cancellation)
    }
}

impl std::fmt::Debug for HandlerInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerInvoker")
            .field("handler_type", &self.handler_type)
            .finish_non_exhaustive()
    }
}

/// Describes the event a strategy is broadcasting.
#[derive(Clone)]
pub struct BroadcastRequest {
    message_type: &'static str,
    transport: TransportType,
    scope: ServiceScope,
    event: Arc<dyn Any + Send + Sync>,
}

impl BroadcastRequest {
    /// Creates a request for `event`.
    pub fn new<E: Message>(event: &E, transport: TransportType, scope: ServiceScope) -> Self {
        Self {
            message_type: E::type_name(),
            transport,
            scope,
            event: Arc::new(event.clone()),
        }
    }

    /// Type name of the event.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Transport the event is published on.
    pub fn transport(&self) -> &TransportType {
        &self.transport
    }

    /// Scope of the publishing call.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// The event, if it is an `E`.
    pub fn event<E: Message>(&self) -> Option<&E> {
        self.event.downcast_ref::<E>()
    }
}

impl std::fmt::Debug for BroadcastRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastRequest")
            .field("message_type", &self.message_type)
            .field("transport", &self.transport)
            .field("scope", &self.scope.id())
            .finish_non_exhaustive()
    }
}

/// Decides how the handlers of one event notification run.
///
/// # Example
///
/// ```ignore
/// struct LastHandlerOnly;
///
/// #[async_trait]
/// impl BroadcastingStrategy for LastHandlerOnly {
///     async fn broadcast(
///         &self,
///         invokers: Vec<HandlerInvoker>,
///         _request: BroadcastRequest,
///         cancellation: CancellationToken,
///     ) -> DispatchResult<()> {
///         match invokers.last() {
///             Some(invoker) => invoker.invoke(cancellation).await,
///             None => Ok(()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait BroadcastingStrategy: Send + Sync + 'static {
    /// Runs `invokers` for the event described by `request`.
    async fn broadcast(
        &self,
        invokers: Vec<HandlerInvoker>,
        request: BroadcastRequest,
        cancellation: CancellationToken,
    ) -> DispatchResult<()>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Service holding the strategy publishers use when none is chosen
/// explicitly.
#[derive(Clone)]
pub struct DefaultBroadcastingStrategy(Arc<dyn BroadcastingStrategy>);

impl DefaultBroadcastingStrategy {
    /// Wraps `strategy`.
    pub fn new(strategy: Arc<dyn BroadcastingStrategy>) -> Self {
        Self(strategy)
    }

    /// The wrapped strategy.
    pub fn strategy(&self) -> Arc<dyn BroadcastingStrategy> {
        Arc::clone(&self.0)
    }
}

impl Default for DefaultBroadcastingStrategy {
    fn default() -> Self {
        Self(Arc::new(SequentialBroadcastingStrategy::default()))
    }
}

impl std::fmt::Debug for DefaultBroadcastingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DefaultBroadcastingStrategy")
            .field(&self.0.name())
            .finish()
    }
}

/// Builds the strategy described by `config`.
///
/// # Errors
///
/// `InvalidArgument` if the parallelism cap is below one.
pub fn strategy_from_config(config: &BroadcastingConfig) -> DispatchResult<Arc<dyn BroadcastingStrategy>> {
    let strategy: Arc<dyn BroadcastingStrategy> = match config.strategy {
        BroadcastingMode::Sequential => Arc::new(SequentialBroadcastingStrategy::new(
            FailurePolicy::from(config.failure_policy),
        )),
        BroadcastingMode::Parallel => match config.max_degree_of_parallelism {
            Some(degree) => Arc::new(ParallelBroadcastingStrategy::with_max_degree_of_parallelism(degree)?),
            None => Arc::new(ParallelBroadcastingStrategy::new()),
        },
    };
    Ok(strategy)
}
