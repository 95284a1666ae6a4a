//! Startup registration.
//!
//! [`ServiceCollection`] gathers handlers, middleware, transport clients
//! and plain services, then freezes them into a
//! [`ServiceProvider`]. The handler, middleware and transport registries
//! are registered in the provider so every scope can resolve them.

use crate::handler::{FnHandler, Handler, TypedHandler};
use crate::registry::{HandlerIdentity, HandlerRegistry};
use crate::transport::{TransportClient, TransportClientFactory, TransportRegistry};
use emissary_broadcast::{strategy_from_config, BroadcastingStrategy, DefaultBroadcastingStrategy};
use emissary_config::EmissaryConfig;
use emissary_core::di::{Container, Lifetime, ServiceProvider, ServiceScope};
use emissary_core::{
    has_unit_response, CancellationToken, ConfigurationError, DispatchResult, Message, MessageKind,
};
use emissary_middleware::{LoggingConfiguration, LoggingMiddleware, MiddlewareRegistry, PipelineBuilder};
use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;

/// Registrations collected at startup.
///
/// # Example
///
/// ```rust,ignore
/// let mut services = ServiceCollection::new();
/// services
///     .add_handler::<CreateUser, CreateUserHandler>()?
///     .add_handler_fn(|event: UserCreated, _scope, _token| async move { Ok(()) })?;
/// services.add_middleware::<RetryMiddleware>();
///
/// let provider = services.build();
/// let scope = provider.create_scope();
/// ```
#[derive(Default)]
pub struct ServiceCollection {
    container: Container,
    handlers: HandlerRegistry,
    middleware: MiddlewareRegistry,
    transports: TransportRegistry,
    next_delegate: u64,
}

impl ServiceCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers handler `H` for `M`, created with `H::default()` for
    /// every message.
    ///
    /// # Errors
    ///
    /// `DuplicateHandler` if a command or query already has a different
    /// handler, `InvalidMessageKind` for an event notification with a
    /// response.
    pub fn add_handler<M, H>(&mut self) -> DispatchResult<&mut Self>
    where
        M: Message,
        H: Handler<M> + Default,
    {
        self.add_typed_handler::<M, H>()?;
        self.container.register_default::<H>(Lifetime::Transient);
        Ok(self)
    }

    /// Registers handler `H` for `M`, created by `factory` with `lifetime`.
    pub fn add_handler_with<M, H, F>(&mut self, lifetime: Lifetime, factory: F) -> DispatchResult<&mut Self>
    where
        M: Message,
        H: Handler<M>,
        F: Fn(&ServiceScope) -> DispatchResult<H> + Send + Sync + 'static,
    {
        self.add_typed_handler::<M, H>()?;
        self.container.register_factory(lifetime, factory);
        Ok(self)
    }

    /// Registers a shared handler instance for `M`.
    pub fn add_handler_instance<M, H>(&mut self, handler: Arc<H>) -> DispatchResult<&mut Self>
    where
        M: Message,
        H: Handler<M>,
    {
        self.add_typed_handler::<M, H>()?;
        self.container.register(handler);
        Ok(self)
    }

    /// Registers a delegate handler for `M`.
    ///
    /// Every delegate is a distinct handler, so a second delegate for a
    /// command or query is rejected.
    pub fn add_handler_fn<M, F, Fut>(&mut self, handler: F) -> DispatchResult<&mut Self>
    where
        M: Message,
        F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
    {
        self.add_delegate(FnHandler::new(handler))
    }

    /// Registers a delegate handler for `M` with a receiver pipeline.
    pub fn add_handler_fn_with_pipeline<M, F, Fut, P>(&mut self, handler: F, pipeline: P) -> DispatchResult<&mut Self>
    where
        M: Message,
        F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
        P: Fn(&mut PipelineBuilder<M>) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.add_delegate(FnHandler::new(handler).with_pipeline(Arc::new(pipeline)))
    }

    fn add_typed_handler<M, H>(&mut self) -> DispatchResult<()>
    where
        M: Message,
        H: Handler<M>,
    {
        validate_message::<M>()?;
        self.handlers.add::<M>(
            HandlerIdentity::Type(TypeId::of::<H>()),
            Arc::new(TypedHandler::<M, H>::new()),
        )
    }

    fn add_delegate<M, F, Fut>(&mut self, handler: FnHandler<M, F>) -> DispatchResult<&mut Self>
    where
        M: Message,
        F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
    {
        validate_message::<M>()?;
        self.next_delegate += 1;
        self.handlers
            .add::<M>(HandlerIdentity::Delegate(self.next_delegate), Arc::new(handler))?;
        Ok(self)
    }

    /// Registers middleware `T`, created with `T::default()` for every
    /// call.
    pub fn add_middleware<T>(&mut self) -> &mut Self
    where
        T: Default + Send + Sync + 'static,
    {
        self.container.register_default::<T>(Lifetime::Transient);
        self.middleware.register::<T>();
        self
    }

    /// Registers middleware `T`, created by `factory` with `lifetime`.
    pub fn add_middleware_with<T, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> DispatchResult<T> + Send + Sync + 'static,
    {
        self.container.register_factory(lifetime, factory);
        self.middleware.register::<T>();
        self
    }

    /// Registers middleware `T` as a kind of `Base`.
    ///
    /// Removing or configuring `Base` in a pipeline also affects `T`.
    pub fn add_derived_middleware<T, Base>(&mut self) -> &mut Self
    where
        T: Default + Send + Sync + 'static,
        Base: 'static,
    {
        self.container.register_default::<T>(Lifetime::Transient);
        self.middleware.register_derived::<T, Base>();
        self
    }

    /// Sends `M` through the client created by `factory` instead of
    /// in-process.
    pub fn add_transport_client<M, C, F>(&mut self, factory: F) -> &mut Self
    where
        M: Message,
        C: TransportClient<M>,
        F: Fn(&ServiceScope) -> DispatchResult<C> + Send + Sync + 'static,
    {
        let factory: TransportClientFactory<M> = Arc::new(
            move |scope: &ServiceScope| -> DispatchResult<Arc<dyn TransportClient<M>>> {
                Ok(Arc::new(factory(scope)?))
            },
        );
        self.transports.register(factory);
        self
    }

    /// Registers a shared service instance.
    pub fn add_singleton<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.container.register(service);
        self
    }

    /// Registers a service created once per scope.
    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> DispatchResult<T> + Send + Sync + 'static,
    {
        self.container.register_factory(Lifetime::Scoped, factory);
        self
    }

    /// Registers a service created for every resolution.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> DispatchResult<T> + Send + Sync + 'static,
    {
        self.container.register_factory(Lifetime::Transient, factory);
        self
    }

    /// Sets the strategy publishers use when none is chosen explicitly.
    pub fn use_broadcasting_strategy(&mut self, strategy: Arc<dyn BroadcastingStrategy>) -> &mut Self {
        tracing::debug!(strategy = strategy.name(), "default broadcasting strategy set");
        self.container
            .register(Arc::new(DefaultBroadcastingStrategy::new(strategy)));
        self
    }

    /// Sets the default strategy to one created by `factory` with
    /// `lifetime`.
    pub fn use_broadcasting_strategy_with<F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        F: Fn(&ServiceScope) -> DispatchResult<Arc<dyn BroadcastingStrategy>> + Send + Sync + 'static,
    {
        self.container
            .register_factory::<DefaultBroadcastingStrategy, _>(lifetime, move |scope: &ServiceScope| {
                Ok(DefaultBroadcastingStrategy::new(factory(scope)?))
            });
        self
    }

    /// Applies file or environment configuration.
    ///
    /// Installs the configured default broadcasting strategy, registers
    /// [`LoggingMiddleware`] and makes the configured logging defaults
    /// available to `use_logging_defaults`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configured parallelism cap is below one.
    pub fn apply_config(&mut self, config: &EmissaryConfig) -> DispatchResult<&mut Self> {
        let strategy = strategy_from_config(&config.broadcasting)?;
        self.use_broadcasting_strategy(strategy);
        self.container.register(Arc::new(LoggingConfiguration::from(
            &config.logging_middleware,
        )));
        self.add_middleware::<LoggingMiddleware>();
        Ok(self)
    }

    /// Handler registrations so far.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Middleware registrations so far.
    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    /// Freezes the collection.
    #[must_use]
    pub fn build(self) -> ServiceProvider {
        let Self {
            mut container,
            handlers,
            middleware,
            transports,
            ..
        } = self;

        tracing::debug!(
            handlers = handlers.len(),
            middleware = middleware.len(),
            "service provider built"
        );

        container.register(Arc::new(handlers));
        container.register(Arc::new(middleware));
        container.register(Arc::new(transports));
        container.build()
    }
}

impl std::fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("container", &self.container)
            .field("handlers", &self.handlers)
            .field("middleware", &self.middleware)
            .field("transports", &self.transports)
            .finish()
    }
}

fn validate_message<M: Message>() -> DispatchResult<()> {
    if M::KIND == MessageKind::EventNotification && !has_unit_response::<M>() {
        return Err(ConfigurationError::InvalidMessageKind {
            message_type: M::type_name(),
            reason: "event notifications cannot have a response".to_owned(),
        }
        .into());
    }
    Ok(())
}
