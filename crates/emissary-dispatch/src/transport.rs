//! Transport clients.
//!
//! A transport client carries a message from the sender pipeline to the
//! handler. The in-process client runs the handler's receiver pipeline
//! directly; other transports are registered per message type in the
//! [`TransportRegistry`].

use crate::handler::DynHandler;
use crate::registry::HandlerRegistry;
use async_trait::async_trait;
use emissary_core::{
    di::ServiceScope, CancellationToken, DispatchResult, Message, MessageKind, TransportRole,
    TransportType,
};
use emissary_middleware::{terminal, MiddlewareRegistry, PipelineBuilder};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Sends messages of type `M` to their handler.
#[async_trait]
pub trait TransportClient<M: Message>: Send + Sync + 'static {
    /// The transport this client sends over, with the sending role.
    fn transport_type(&self) -> TransportType;

    /// Sends `message` and waits for the response.
    async fn send(
        &self,
        message: M,
        scope: &ServiceScope,
        cancellation: CancellationToken,
    ) -> DispatchResult<M::Response>;
}

/// Role of the sending side for messages of kind `kind`.
pub(crate) const fn sending_role(kind: MessageKind) -> TransportRole {
    match kind {
        MessageKind::EventNotification => TransportRole::Publisher,
        MessageKind::Command | MessageKind::Query => TransportRole::Sender,
    }
}

/// Runs a command or query through its handler's receiver pipeline in the
/// current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessTransportClient;

#[async_trait]
impl<M: Message> TransportClient<M> for InProcessTransportClient {
    fn transport_type(&self) -> TransportType {
        TransportType::in_process(sending_role(M::KIND))
    }

    async fn send(
        &self,
        message: M,
        scope: &ServiceScope,
        cancellation: CancellationToken,
    ) -> DispatchResult<M::Response> {
        let handler = scope.resolve_required::<HandlerRegistry>()?.single_handler::<M>()?;
        receive(scope, handler, message, cancellation).await
    }
}

/// Runs `handler` behind its receiver pipeline.
pub(crate) async fn receive<M: Message>(
    scope: &ServiceScope,
    handler: Arc<dyn DynHandler<M>>,
    message: M,
    cancellation: CancellationToken,
) -> DispatchResult<M::Response> {
    let registry = scope.resolve_required::<MiddlewareRegistry>()?;
    let mut builder = PipelineBuilder::new(
        registry,
        scope.clone(),
        TransportType::in_process(TransportRole::Receiver),
    );
    handler.configure_pipeline(&mut builder)?;
    let pipeline = builder.build();

    tracing::trace!(
        message_type = M::type_name(),
        handler = handler.handler_type(),
        middleware = pipeline.len(),
        "dispatching to handler"
    );

    let handler_scope = scope.clone();
    let terminal = terminal(move |message: M, cancellation: CancellationToken| {
        handler.handle_dyn(&handler_scope, message, cancellation)
    });
    pipeline.execute(message, cancellation, terminal).await
}

/// A transport client backed by an async function.
///
/// Useful for adapting an external transport, or for tests that stand in
/// for one.
pub struct FnTransportClient<M, F> {
    transport: TransportType,
    send: F,
    _marker: PhantomData<fn(M)>,
}

impl<M, F, Fut> FnTransportClient<M, F>
where
    M: Message,
    F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
{
    /// Creates a client for `transport` that sends with `send`.
    pub fn new(transport: TransportType, send: F) -> Self {
        Self {
            transport,
            send,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M, F, Fut> TransportClient<M> for FnTransportClient<M, F>
where
    M: Message,
    F: Fn(M, ServiceScope, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<M::Response>> + Send + 'static,
{
    fn transport_type(&self) -> TransportType {
        self.transport.clone()
    }

    async fn send(
        &self,
        message: M,
        scope: &ServiceScope,
        cancellation: CancellationToken,
    ) -> DispatchResult<M::Response> {
        (self.send)(message, scope.clone(), cancellation).await
    }
}

impl<M, F> std::fmt::Debug for FnTransportClient<M, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransportClient")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Creates the transport client for one message type.
pub type TransportClientFactory<M> =
    Arc<dyn Fn(&ServiceScope) -> DispatchResult<Arc<dyn TransportClient<M>>> + Send + Sync>;

/// Transport clients configured per message type.
///
/// Message types without a configured client use the in-process transport.
#[derive(Default)]
pub struct TransportRegistry {
    factories: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client factory for `M`, replacing any earlier one.
    pub fn register<M: Message>(&mut self, factory: TransportClientFactory<M>) {
        tracing::debug!(message_type = M::type_name(), "transport client registered");
        self.factories
            .insert(TypeId::of::<M>(), (M::type_name(), Arc::new(factory)));
    }

    /// Returns `true` if `M` has a configured client.
    #[must_use]
    pub fn contains<M: Message>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<M>())
    }

    /// The configured client factory for `M`.
    #[must_use]
    pub fn factory<M: Message>(&self) -> Option<TransportClientFactory<M>> {
        self.factories
            .get(&TypeId::of::<M>())
            .and_then(|(_, factory)| factory.downcast_ref::<TransportClientFactory<M>>())
            .cloned()
    }

    /// Creates the client for `M`: the configured one, or in-process.
    ///
    /// # Errors
    ///
    /// Returns the configured factory's error.
    pub fn client_for<M: Message>(&self, scope: &ServiceScope) -> DispatchResult<Arc<dyn TransportClient<M>>> {
        match self.factory::<M>() {
            Some(factory) => factory(scope),
            None => Ok(Arc::new(InProcessTransportClient)),
        }
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field(
                "message_types",
                &self.factories.values().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Chooses the transport of one message client call.
pub struct TransportClientBuilder<M> {
    scope: ServiceScope,
    _marker: PhantomData<fn(M)>,
}

impl<M: Message> TransportClientBuilder<M> {
    pub(crate) fn new(scope: ServiceScope) -> Self {
        Self {
            scope,
            _marker: PhantomData,
        }
    }

    /// Scope of the call.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// The in-process transport.
    #[must_use]
    pub fn use_in_process(&self) -> Arc<dyn TransportClient<M>> {
        Arc::new(InProcessTransportClient)
    }

    /// The client registered for `M`, or in-process if there is none.
    ///
    /// # Errors
    ///
    /// Returns the configured factory's error.
    pub fn use_configured(&self) -> DispatchResult<Arc<dyn TransportClient<M>>> {
        match self.scope.resolve::<TransportRegistry>() {
            Some(registry) => registry.client_for::<M>(&self.scope),
            None => Ok(self.use_in_process()),
        }
    }
}

impl<M> std::fmt::Debug for TransportClientBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClientBuilder")
            .field("scope", &self.scope.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use crate::registry::HandlerIdentity;
    use emissary_core::di::Container;

    #[derive(Debug, Clone)]
    struct Echo(String);

    impl Message for Echo {
        type Response = String;
        const KIND: MessageKind = MessageKind::Query;
    }

    fn scope_with_echo_handler() -> ServiceScope {
        let mut handlers = HandlerRegistry::new();
        let handler = FnHandler::<Echo, _>::new(|message: Echo, _: ServiceScope, _: CancellationToken| async move {
            Ok(format!("echo: {}", message.0))
        });
        handlers
            .add::<Echo>(HandlerIdentity::Delegate(1), Arc::new(handler))
            .unwrap();

        let mut container = Container::new();
        container.register(Arc::new(handlers));
        container.register(Arc::new(MiddlewareRegistry::new()));
        container.build().create_scope()
    }

    #[tokio::test]
    async fn test_in_process_client_runs_handler() {
        let scope = scope_with_echo_handler();
        let client: Arc<dyn TransportClient<Echo>> = Arc::new(InProcessTransportClient);

        assert_eq!(client.transport_type(), TransportType::in_process(TransportRole::Sender));
        let response = client
            .send(Echo("hi".into()), &scope, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, "echo: hi");
    }

    #[tokio::test]
    async fn test_in_process_client_without_handler() {
        let mut container = Container::new();
        container.register(Arc::new(HandlerRegistry::new()));
        container.register(Arc::new(MiddlewareRegistry::new()));
        let scope = container.build().create_scope();

        let error = InProcessTransportClient
            .send(Echo("hi".into()), &scope, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[tokio::test]
    async fn test_registry_prefers_configured_client() {
        let scope = scope_with_echo_handler();
        let mut registry = TransportRegistry::new();
        registry.register::<Echo>(Arc::new(|_: &ServiceScope| -> DispatchResult<Arc<dyn TransportClient<Echo>>> {
            let client: Arc<dyn TransportClient<Echo>> = Arc::new(FnTransportClient::new(
                TransportType::new("loopback", TransportRole::Sender),
                |message: Echo, _: ServiceScope, _: CancellationToken| async move { Ok(message.0) },
            ));
            Ok(client)
        }));

        assert!(registry.contains::<Echo>());
        let client = registry.client_for::<Echo>(&scope).unwrap();
        assert_eq!(client.transport_type().name(), "loopback");
        let response = client
            .send(Echo("raw".into()), &scope, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, "raw");
    }

    #[test]
    fn test_registry_falls_back_to_in_process() {
        let scope = Container::new().build().create_scope();
        let client = TransportRegistry::new().client_for::<Echo>(&scope).unwrap();
        assert!(client.transport_type().is_in_process());
    }
}
