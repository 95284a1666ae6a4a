//! Message clients.
//!
//! A [`MessageClient`] is the caller's handle for one command or query
//! type. Every call runs the sender pipeline the client was configured
//! with, hands the message to the transport, and on the receiving side
//! runs the handler's own pipeline:
//!
//! ```text
//! handle() → sender pipeline → transport → receiver pipeline → handler
//! ```

use crate::handler::PipelineConfigurator;
use crate::publisher::EventPublisher;
use crate::transport::{sending_role, TransportClient, TransportClientBuilder};
use emissary_core::di::ServiceScope;
use emissary_core::propagation::{self, Propagation};
use emissary_core::{CancellationToken, ConfigurationError, DispatchResult, Message, MessageKind};
use emissary_middleware::{terminal, MiddlewareRegistry, PipelineBuilder};
use std::sync::Arc;

type TransportSelector<M> = Arc<
    dyn Fn(&TransportClientBuilder<M>) -> DispatchResult<Arc<dyn TransportClient<M>>> + Send + Sync,
>;

/// Sends commands or queries of type `M`.
///
/// Cheap to clone. Clients built from one scope resolve handlers,
/// middleware and transports from that scope.
pub struct MessageClient<M: Message> {
    scope: ServiceScope,
    pipelines: Vec<PipelineConfigurator<M>>,
    transport: Option<TransportSelector<M>>,
}

impl<M: Message> MessageClient<M> {
    pub(crate) fn new(scope: ServiceScope) -> Self {
        Self {
            scope,
            pipelines: Vec::new(),
            transport: None,
        }
    }

    /// Adds sender-side middleware.
    ///
    /// Calls chain; configurators run in the order they were added, all
    /// against the same builder.
    #[must_use]
    pub fn with_pipeline<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut PipelineBuilder<M>) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.pipelines.push(Arc::new(configure));
        self
    }

    /// Chooses the transport for every call, replacing the configured one.
    #[must_use]
    pub fn with_transport<F>(mut self, select: F) -> Self
    where
        F: Fn(&TransportClientBuilder<M>) -> DispatchResult<Arc<dyn TransportClient<M>>> + Send + Sync + 'static,
    {
        self.transport = Some(Arc::new(select));
        self
    }

    /// The scope this client resolves services from.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// Sends `message` and waits for the response.
    ///
    /// The call runs in a child of the active dispatch context with a fresh
    /// message id.
    pub async fn handle(&self, message: M, cancellation: CancellationToken) -> DispatchResult<M::Response> {
        propagation::run(Propagation::Fork, |context| async move {
            let message_id = context.assign_message_id();

            let builder = TransportClientBuilder::new(self.scope.clone());
            let client = match &self.transport {
                Some(select) => select(&builder)?,
                None => builder.use_configured()?,
            };
            let transport = client.transport_type().with_role(sending_role(M::KIND));

            let registry = self.scope.resolve_required::<MiddlewareRegistry>()?;
            let mut pipeline = PipelineBuilder::new(registry, self.scope.clone(), transport);
            for configure in &self.pipelines {
                configure(&mut pipeline)?;
            }
            let pipeline = pipeline.build();

            tracing::debug!(
                message_type = M::type_name(),
                message_id = %message_id,
                trace_id = %context.trace_id(),
                transport = %pipeline.transport(),
                middleware = pipeline.len(),
                "sending message"
            );

            let scope = self.scope.clone();
            let terminal = terminal(move |message: M, cancellation: CancellationToken| {
                let client = Arc::clone(&client);
                let scope = scope.clone();
                async move { client.send(message, &scope, cancellation).await }
            });
            pipeline.execute(message, cancellation, terminal).await
        })
        .await
    }
}

impl<M: Message> Clone for MessageClient<M> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            pipelines: self.pipelines.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<M: Message> std::fmt::Debug for MessageClient<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageClient")
            .field("message_type", &M::type_name())
            .field("scope", &self.scope.id())
            .field("pipelines", &self.pipelines.len())
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

/// Creates message clients and event publishers bound to one scope.
#[derive(Debug, Clone)]
pub struct MessageClients {
    scope: ServiceScope,
}

impl MessageClients {
    /// Creates clients bound to `scope`.
    pub fn new(scope: ServiceScope) -> Self {
        Self { scope }
    }

    /// A client for command or query `M`.
    ///
    /// # Errors
    ///
    /// `InvalidMessageKind` if `M` is an event notification.
    pub fn for_message<M: Message>(&self) -> DispatchResult<MessageClient<M>> {
        if M::KIND == MessageKind::EventNotification {
            return Err(ConfigurationError::InvalidMessageKind {
                message_type: M::type_name(),
                reason: "event notifications are published with `for_event`".to_owned(),
            }
            .into());
        }
        Ok(MessageClient::new(self.scope.clone()))
    }

    /// A publisher for event notification `E`.
    ///
    /// # Errors
    ///
    /// `InvalidMessageKind` if `E` is a command or query.
    pub fn for_event<E: Message<Response = ()>>(&self) -> DispatchResult<EventPublisher<E>> {
        if E::KIND != MessageKind::EventNotification {
            return Err(ConfigurationError::InvalidMessageKind {
                message_type: E::type_name(),
                reason: "commands and queries are sent with `for_message`".to_owned(),
            }
            .into());
        }
        Ok(EventPublisher::new(self.scope.clone()))
    }
}

/// Dispatch shortcuts on [`ServiceScope`].
pub trait DispatchScopeExt {
    /// Clients bound to this scope.
    fn message_clients(&self) -> MessageClients;

    /// A client for command or query `M`.
    fn message_client<M: Message>(&self) -> DispatchResult<MessageClient<M>>;

    /// A publisher for event notification `E`.
    fn event_publisher<E: Message<Response = ()>>(&self) -> DispatchResult<EventPublisher<E>>;
}

impl DispatchScopeExt for ServiceScope {
    fn message_clients(&self) -> MessageClients {
        MessageClients::new(self.clone())
    }

    fn message_client<M: Message>(&self) -> DispatchResult<MessageClient<M>> {
        self.message_clients().for_message::<M>()
    }

    fn event_publisher<E: Message<Response = ()>>(&self) -> DispatchResult<EventPublisher<E>> {
        self.message_clients().for_event::<E>()
    }
}
