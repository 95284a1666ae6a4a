//! Event publishers.
//!
//! Publishing an event notification runs the publisher pipeline once, then
//! fans the event out to every registered handler through a
//! [`BroadcastingStrategy`]. Each handler runs its own receiver pipeline in
//! a forked dispatch context.
//!
//! The strategy is, in order of preference:
//!
//! 1. the one chosen with [`EventPublisher::with_publisher`]
//! 2. the [`DefaultBroadcastingStrategy`] registered in the scope
//! 3. sequential, failing fast

use crate::handler::PipelineConfigurator;
use crate::registry::HandlerRegistry;
use crate::transport::{receive, TransportClient, TransportRegistry};
use emissary_broadcast::{
    BroadcastRequest, BroadcastingStrategy, DefaultBroadcastingStrategy, FailurePolicy, HandlerInvoker,
    ParallelBroadcastingStrategy, SequentialBroadcastingStrategy,
};
use emissary_core::di::ServiceScope;
use emissary_core::propagation::{self, Propagation};
use emissary_core::{
    BoxFuture, CancellationToken, DispatchResult, Message, TransportRole, TransportType,
};
use emissary_middleware::{terminal, MiddlewareRegistry, PipelineBuilder};
use std::marker::PhantomData;
use std::sync::Arc;

type PublisherSelector<E> =
    Arc<dyn Fn(&PublisherBuilder<E>) -> DispatchResult<ConfiguredPublisher<E>> + Send + Sync>;

enum Delivery<E> {
    InProcess(Option<Arc<dyn BroadcastingStrategy>>),
    Transport(Arc<dyn TransportClient<E>>),
}

/// How one publish call delivers its event.
///
/// Created through [`PublisherBuilder`].
pub struct ConfiguredPublisher<E> {
    delivery: Delivery<E>,
}

impl<E: Message<Response = ()>> ConfiguredPublisher<E> {
    fn transport_type(&self) -> TransportType {
        match &self.delivery {
            Delivery::InProcess(_) => TransportType::in_process(TransportRole::Publisher),
            Delivery::Transport(client) => client.transport_type().with_role(TransportRole::Publisher),
        }
    }
}

impl<E> std::fmt::Debug for ConfiguredPublisher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.delivery {
            Delivery::InProcess(strategy) => f
                .debug_struct("ConfiguredPublisher")
                .field("strategy", &strategy.as_ref().map(|s| s.name()))
                .finish(),
            Delivery::Transport(_) => f
                .debug_struct("ConfiguredPublisher")
                .field("transport", &"external")
                .finish(),
        }
    }
}

/// Chooses how one publish call delivers its event.
pub struct PublisherBuilder<E> {
    scope: ServiceScope,
    _marker: PhantomData<fn(E)>,
}

impl<E: Message<Response = ()>> PublisherBuilder<E> {
    fn new(scope: ServiceScope) -> Self {
        Self {
            scope,
            _marker: PhantomData,
        }
    }

    /// Scope of the call.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// In-process handlers with the scope's default strategy.
    pub fn use_in_process(&self) -> DispatchResult<ConfiguredPublisher<E>> {
        Ok(ConfiguredPublisher {
            delivery: Delivery::InProcess(None),
        })
    }

    /// In-process handlers, one at a time.
    pub fn use_sequential(&self, policy: FailurePolicy) -> DispatchResult<ConfiguredPublisher<E>> {
        self.use_strategy(Arc::new(SequentialBroadcastingStrategy::new(policy)))
    }

    /// In-process handlers, concurrently, at most `max_degree_of_parallelism`
    /// at a time when given.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the cap is below one.
    pub fn use_parallel(&self, max_degree_of_parallelism: Option<i64>) -> DispatchResult<ConfiguredPublisher<E>> {
        let strategy = match max_degree_of_parallelism {
            Some(degree) => ParallelBroadcastingStrategy::with_max_degree_of_parallelism(degree)?,
            None => ParallelBroadcastingStrategy::new(),
        };
        self.use_strategy(Arc::new(strategy))
    }

    /// In-process handlers with `strategy`.
    pub fn use_strategy(&self, strategy: Arc<dyn BroadcastingStrategy>) -> DispatchResult<ConfiguredPublisher<E>> {
        Ok(ConfiguredPublisher {
            delivery: Delivery::InProcess(Some(strategy)),
        })
    }

    /// Sends the event through `client` instead of broadcasting locally.
    pub fn use_transport(&self, client: Arc<dyn TransportClient<E>>) -> DispatchResult<ConfiguredPublisher<E>> {
        Ok(ConfiguredPublisher {
            delivery: Delivery::Transport(client),
        })
    }

    /// The transport client registered for `E`, or in-process handlers.
    pub fn use_configured(&self) -> DispatchResult<ConfiguredPublisher<E>> {
        let factory = self
            .scope
            .resolve::<TransportRegistry>()
            .and_then(|registry| registry.factory::<E>());
        match factory {
            Some(factory) => self.use_transport(factory(&self.scope)?),
            None => self.use_in_process(),
        }
    }
}

impl<E> std::fmt::Debug for PublisherBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherBuilder")
            .field("scope", &self.scope.id())
            .finish()
    }
}

/// Publishes event notifications of type `E`.
pub struct EventPublisher<E: Message<Response = ()>> {
    scope: ServiceScope,
    pipelines: Vec<PipelineConfigurator<E>>,
    publisher: Option<PublisherSelector<E>>,
}

impl<E: Message<Response = ()>> EventPublisher<E> {
    pub(crate) fn new(scope: ServiceScope) -> Self {
        Self {
            scope,
            pipelines: Vec::new(),
            publisher: None,
        }
    }

    /// Adds publisher-side middleware. Calls chain.
    #[must_use]
    pub fn with_pipeline<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut PipelineBuilder<E>) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.pipelines.push(Arc::new(configure));
        self
    }

    /// Chooses how events are delivered.
    ///
    /// `select` runs at the start of every publish call, before any
    /// middleware or handler.
    #[must_use]
    pub fn with_publisher<F>(mut self, select: F) -> Self
    where
        F: Fn(&PublisherBuilder<E>) -> DispatchResult<ConfiguredPublisher<E>> + Send + Sync + 'static,
    {
        self.publisher = Some(Arc::new(select));
        self
    }

    /// The scope this publisher resolves services from.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// Publishes `event` to every handler.
    ///
    /// # Errors
    ///
    /// Whatever the publisher pipeline or the broadcasting strategy
    /// reports. With the built-in strategies a single failure is returned
    /// unchanged and several failures as an aggregate.
    pub async fn handle(&self, event: E, cancellation: CancellationToken) -> DispatchResult<()> {
        propagation::run(Propagation::Fork, |context| async move {
            let message_id = context.assign_message_id();

            let builder = PublisherBuilder::new(self.scope.clone());
            let publisher = match &self.publisher {
                Some(select) => select(&builder)?,
                None => builder.use_configured()?,
            };
            let transport = publisher.transport_type();

            let registry = self.scope.resolve_required::<MiddlewareRegistry>()?;
            let mut pipeline = PipelineBuilder::new(registry, self.scope.clone(), transport.clone());
            for configure in &self.pipelines {
                configure(&mut pipeline)?;
            }
            let pipeline = pipeline.build();

            tracing::debug!(
                message_type = E::type_name(),
                message_id = %message_id,
                trace_id = %context.trace_id(),
                transport = %transport,
                middleware = pipeline.len(),
                "publishing event"
            );

            let scope = self.scope.clone();
            let terminal = match publisher.delivery {
                Delivery::InProcess(strategy) => terminal(move |event: E, cancellation: CancellationToken| {
                    broadcast(scope.clone(), strategy.clone(), transport.clone(), event, cancellation)
                }),
                Delivery::Transport(client) => terminal(move |event: E, cancellation: CancellationToken| {
                    let client = Arc::clone(&client);
                    let scope = scope.clone();
                    async move { client.send(event, &scope, cancellation).await }
                }),
            };
            pipeline.execute(event, cancellation, terminal).await
        })
        .await
    }
}

impl<E: Message<Response = ()>> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            pipelines: self.pipelines.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<E: Message<Response = ()>> std::fmt::Debug for EventPublisher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("message_type", &E::type_name())
            .field("scope", &self.scope.id())
            .field("pipelines", &self.pipelines.len())
            .field("custom_publisher", &self.publisher.is_some())
            .finish()
    }
}

/// Runs every in-process handler of `event` through `strategy`.
async fn broadcast<E: Message<Response = ()>>(
    scope: ServiceScope,
    strategy: Option<Arc<dyn BroadcastingStrategy>>,
    transport: TransportType,
    event: E,
    cancellation: CancellationToken,
) -> DispatchResult<()> {
    let strategy = match strategy {
        Some(strategy) => strategy,
        None if scope.contains::<DefaultBroadcastingStrategy>() => scope
            .resolve_required::<DefaultBroadcastingStrategy>()?
            .strategy(),
        None => Arc::new(SequentialBroadcastingStrategy::default()),
    };

    let invokers: Vec<HandlerInvoker> = scope
        .resolve_required::<HandlerRegistry>()?
        .handlers_for::<E>()
        .into_iter()
        .map(|handler| {
            let scope = scope.clone();
            let event = event.clone();
            HandlerInvoker::new(handler.handler_type(), move |cancellation: CancellationToken| -> BoxFuture<'static, DispatchResult<()>> {
                let scope = scope.clone();
                let event = event.clone();
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    propagation::run(Propagation::Fork, |_| async move {
                        receive(&scope, handler, event, cancellation).await
                    })
                    .await
                })
            })
        })
        .collect();

    tracing::debug!(
        message_type = E::type_name(),
        strategy = strategy.name(),
        handlers = invokers.len(),
        "broadcasting event"
    );

    let request = BroadcastRequest::new(&event, transport, scope);
    strategy.broadcast(invokers, request, cancellation).await
}
