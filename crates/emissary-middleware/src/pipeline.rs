//! Pipeline construction and execution.
//!
//! A [`PipelineBuilder`] is the ordered, mutable list of middleware a
//! message passes through. Once configuration is finished it is frozen with
//! [`PipelineBuilder::build`] into a [`Pipeline`], which can be shared and
//! executed any number of times, concurrently.
//!
//! # Execution Model
//!
//! ```text
//! execute(message)
//!   └─ M1.execute(ctx) ── ctx.next ──┐
//!                                    M2.execute(ctx) ── ctx.next ──┐
//!                                                                  terminal(message)
//! ```
//!
//! Entries run in insertion order. The terminal is supplied by the caller:
//! the handler, a transport client, or a broadcasting strategy.

use crate::middleware::{Chain, Invocation, Middleware, Next};
use crate::registry::MiddlewareRegistry;
use emissary_core::{
    di::ServiceScope,
    propagation::{self, Propagation},
    BoxFuture, CancellationToken, ConfigurationError, DispatchResult, Message, TransportType,
};
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

/// The innermost step of a pipeline.
pub type Terminal<M> = Arc<
    dyn Fn(M, CancellationToken) -> BoxFuture<'static, DispatchResult<<M as Message>::Response>>
        + Send
        + Sync,
>;

/// Type-erased call into one middleware type.
pub(crate) type MiddlewareInvoker<M> = Arc<
    dyn Fn(Invocation<M>) -> BoxFuture<'static, DispatchResult<<M as Message>::Response>>
        + Send
        + Sync,
>;

/// Builds the invoker for middleware `T`.
///
/// The instance is resolved from the pipeline's scope on every call.
fn invoker<M: Message, T: Middleware<M>>() -> MiddlewareInvoker<M> {
    Arc::new(|invocation: Invocation<M>| -> BoxFuture<'static, DispatchResult<M::Response>> {
        Box::pin(async move {
            let configuration = Arc::clone(&invocation.configuration)
                .downcast::<T::Configuration>()
                .map_err(|_| ConfigurationError::ConfigurationTypeMismatch {
                    middleware: type_name::<T>(),
                    expected: type_name::<T::Configuration>(),
                })?;
            let middleware = invocation.scope.resolve_required::<T>()?;
            let ctx = invocation.into_context(configuration);
            middleware.execute(ctx).await
        })
    })
}

struct BuilderEntry<M: Message> {
    type_id: TypeId,
    type_name: &'static str,
    configuration: Box<dyn Any + Send + Sync>,
    invoker: MiddlewareInvoker<M>,
}

/// Read-only view of one middleware entry.
#[derive(Clone, Copy)]
pub struct MiddlewareDescriptor<'a> {
    type_id: TypeId,
    type_name: &'static str,
    configuration: &'a (dyn Any + Send + Sync),
}

impl<'a> MiddlewareDescriptor<'a> {
    /// The middleware type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if this entry is exactly middleware `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// The entry's configuration, if it is a `C`.
    #[must_use]
    pub fn configuration<C: 'static>(&self) -> Option<&'a C> {
        self.configuration.downcast_ref::<C>()
    }
}

impl std::fmt::Debug for MiddlewareDescriptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareDescriptor")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The ordered, mutable middleware list for message type `M`.
///
/// Every operation that can fail returns `DispatchResult<&mut Self>` so
/// calls chain with `?`:
///
/// ```ignore
/// builder
///     .use_middleware::<Retry>(3)?
///     .use_middleware_default::<Timing>()?
///     .configure::<Retry, _>(|attempts| *attempts += 1)?;
/// ```
pub struct PipelineBuilder<M: Message> {
    registry: Arc<MiddlewareRegistry>,
    scope: ServiceScope,
    transport: TransportType,
    entries: Vec<BuilderEntry<M>>,
}

impl<M: Message> PipelineBuilder<M> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(registry: Arc<MiddlewareRegistry>, scope: ServiceScope, transport: TransportType) -> Self {
        Self {
            registry,
            scope,
            transport,
            entries: Vec::new(),
        }
    }

    /// The scope the pipeline is being built in.
    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }

    /// The transport the pipeline is attached to.
    pub fn transport(&self) -> &TransportType {
        &self.transport
    }

    /// The middleware registry the builder validates against.
    pub fn registry(&self) -> &MiddlewareRegistry {
        &self.registry
    }

    /// Appends middleware `T` with `configuration`.
    ///
    /// # Errors
    ///
    /// - `UnknownMiddleware` if `T` was never registered
    /// - `DuplicateMiddleware` if `T` is already part of the pipeline
    pub fn use_middleware<T: Middleware<M>>(
        &mut self,
        configuration: T::Configuration,
    ) -> DispatchResult<&mut Self> {
        self.ensure_registered::<T>()?;

        if self.entries.iter().any(|entry| entry.type_id == TypeId::of::<T>()) {
            return Err(ConfigurationError::DuplicateMiddleware {
                middleware: type_name::<T>(),
            }
            .into());
        }

        self.push::<T>(configuration);
        Ok(self)
    }

    /// Appends middleware `T` with its default configuration.
    ///
    /// # Errors
    ///
    /// Same as [`use_middleware`](Self::use_middleware).
    pub fn use_middleware_default<T>(&mut self) -> DispatchResult<&mut Self>
    where
        T: Middleware<M>,
        T::Configuration: Default,
    {
        self.use_middleware::<T>(T::Configuration::default())
    }

    /// Appends middleware `T` even if it is already part of the pipeline.
    ///
    /// # Errors
    ///
    /// `UnknownMiddleware` if `T` was never registered.
    pub fn use_allow_multiple<T: Middleware<M>>(
        &mut self,
        configuration: T::Configuration,
    ) -> DispatchResult<&mut Self> {
        self.ensure_registered::<T>()?;
        self.push::<T>(configuration);
        Ok(self)
    }

    /// Removes every entry of `T`, including middleware registered as
    /// derived from `T`. A no-op if there are none.
    pub fn without<T: 'static>(&mut self) -> &mut Self {
        let target = TypeId::of::<T>();
        let before = self.entries.len();
        let registry = &self.registry;
        self.entries
            .retain(|entry| !registry.is_assignable(entry.type_id, target));

        tracing::trace!(
            message_type = M::type_name(),
            middleware = type_name::<T>(),
            removed = before - self.entries.len(),
            "middleware removed from pipeline"
        );
        self
    }

    /// Applies `update` to the configuration of every entry of `T`,
    /// including middleware registered as derived from `T`.
    ///
    /// # Errors
    ///
    /// - `MiddlewareNotUsed` if no entry matches
    /// - `ConfigurationTypeMismatch` if a matching entry stores a different
    ///   configuration type
    pub fn configure<T, F>(&mut self, mut update: F) -> DispatchResult<&mut Self>
    where
        T: Middleware<M>,
        F: FnMut(&mut T::Configuration),
    {
        let target = TypeId::of::<T>();
        let registry = &self.registry;
        let mut matching: Vec<&mut BuilderEntry<M>> = self
            .entries
            .iter_mut()
            .filter(|entry| registry.is_assignable(entry.type_id, target))
            .collect();

        if matching.is_empty() {
            return Err(ConfigurationError::MiddlewareNotUsed {
                middleware: type_name::<T>(),
            }
            .into());
        }

        // Nothing is updated unless every match holds the expected type.
        if let Some(mismatch) = matching
            .iter()
            .find(|entry| !entry.configuration.is::<T::Configuration>())
        {
            return Err(ConfigurationError::ConfigurationTypeMismatch {
                middleware: mismatch.type_name,
                expected: type_name::<T::Configuration>(),
            }
            .into());
        }

        for entry in &mut matching {
            if let Some(configuration) = entry.configuration.downcast_mut::<T::Configuration>() {
                update(configuration);
            }
        }

        Ok(self)
    }

    /// Returns `true` if an entry of `T` (or of a middleware derived from
    /// `T`) is present.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        let target = TypeId::of::<T>();
        self.entries
            .iter()
            .any(|entry| self.registry.is_assignable(entry.type_id, target))
    }

    /// Iterates over the entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = MiddlewareDescriptor<'_>> {
        self.entries.iter().map(|entry| MiddlewareDescriptor {
            type_id: entry.type_id,
            type_name: entry.type_name,
            configuration: entry.configuration.as_ref(),
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pipeline has no middleware.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the builder into an executable pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline<M> {
        let entries: Arc<[PipelineEntry<M>]> = self
            .entries
            .into_iter()
            .map(|entry| PipelineEntry {
                type_name: entry.type_name,
                configuration: Arc::from(entry.configuration),
                invoker: entry.invoker,
            })
            .collect();

        tracing::debug!(
            message_type = M::type_name(),
            middleware_count = entries.len(),
            transport = %self.transport,
            "pipeline built"
        );

        Pipeline {
            entries,
            scope: self.scope,
            transport: self.transport,
        }
    }

    fn ensure_registered<T: 'static>(&self) -> DispatchResult<()> {
        if self.registry.contains::<T>() {
            Ok(())
        } else {
            Err(ConfigurationError::UnknownMiddleware {
                middleware: type_name::<T>(),
            }
            .into())
        }
    }

    fn push<T: Middleware<M>>(&mut self, configuration: T::Configuration) {
        tracing::trace!(
            message_type = M::type_name(),
            middleware = type_name::<T>(),
            position = self.entries.len(),
            "middleware added to pipeline"
        );
        self.entries.push(BuilderEntry {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            configuration: Box::new(configuration),
            invoker: invoker::<M, T>(),
        });
    }
}

impl<M: Message> std::fmt::Debug for PipelineBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("message_type", &M::type_name())
            .field("transport", &self.transport)
            .field(
                "middleware",
                &self.entries.iter().map(|e| e.type_name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// One frozen middleware entry.
pub(crate) struct PipelineEntry<M: Message> {
    type_name: &'static str,
    pub(crate) configuration: Arc<dyn Any + Send + Sync>,
    pub(crate) invoker: MiddlewareInvoker<M>,
}

impl<M: Message> PipelineEntry<M> {
    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// An immutable, shareable execution plan for message type `M`.
///
/// Each call to [`execute`](Self::execute) gets its own chain state, so one
/// pipeline can serve concurrent calls.
pub struct Pipeline<M: Message> {
    entries: Arc<[PipelineEntry<M>]>,
    scope: ServiceScope,
    transport: TransportType,
}

impl<M: Message> Clone for Pipeline<M> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            scope: self.scope.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<M: Message> Pipeline<M> {
    /// Number of middleware entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pipeline has no middleware.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Middleware type names in execution order.
    #[must_use]
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(PipelineEntry::type_name).collect()
    }

    /// The transport this pipeline is attached to.
    pub fn transport(&self) -> &TransportType {
        &self.transport
    }

    /// Runs `message` through every middleware and then `terminal`.
    ///
    /// Runs inside the active dispatch context, or a new one if there is
    /// none.
    ///
    /// # Errors
    ///
    /// Returns whatever a middleware or the terminal returned, unchanged.
    pub async fn execute(
        &self,
        message: M,
        cancellation: CancellationToken,
        terminal: Terminal<M>,
    ) -> DispatchResult<M::Response> {
        let entries = Arc::clone(&self.entries);
        let scope = self.scope.clone();
        let transport = self.transport.clone();

        propagation::run(Propagation::Inherit, move |context| {
            let next = Next::start(Chain {
                entries,
                terminal,
                scope,
                context,
                transport,
            });
            next.run(message, cancellation)
        })
        .await
    }

    /// Turns this pipeline and `terminal` into a terminal for an outer
    /// pipeline.
    #[must_use]
    pub fn into_terminal(self, terminal: Terminal<M>) -> Terminal<M> {
        Arc::new(move |message: M, cancellation: CancellationToken| -> BoxFuture<'static, DispatchResult<M::Response>> {
            let pipeline = self.clone();
            let terminal = Arc::clone(&terminal);
            Box::pin(async move { pipeline.execute(message, cancellation, terminal).await })
        })
    }
}

impl<M: Message> std::fmt::Debug for Pipeline<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("message_type", &M::type_name())
            .field("transport", &self.transport)
            .field("middleware", &self.middleware_names())
            .finish()
    }
}

/// Wraps a plain async function as a [`Terminal`].
pub fn terminal<M, F, Fut>(f: F) -> Terminal<M>
where
    M: Message,
    F: Fn(M, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = DispatchResult<M::Response>> + Send + 'static,
{
    Arc::new(
        move |message: M, cancellation: CancellationToken| -> BoxFuture<'static, DispatchResult<M::Response>> {
            Box::pin(f(message, cancellation))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareContext;
    use emissary_core::di::{Container, Lifetime};
    use emissary_core::{DispatchError, MessageKind, TransportRole};
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    struct Ping(u32);

    impl Message for Ping {
        type Response = u32;
        const KIND: MessageKind = MessageKind::Query;
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[derive(Default)]
    struct Tag;

    impl Middleware<Ping> for Tag {
        type Configuration = String;

        fn execute(
            &self,
            ctx: MiddlewareContext<Ping, String>,
        ) -> BoxFuture<'_, DispatchResult<u32>> {
            Box::pin(async move {
                if let Some(recorder) = ctx.scope().resolve::<Recorder>() {
                    recorder.seen.lock().push(ctx.configuration().clone());
                }
                ctx.proceed().await
            })
        }
    }

    #[derive(Default)]
    struct Other;

    impl Middleware<Ping> for Other {
        type Configuration = ();

        fn execute(&self, ctx: MiddlewareContext<Ping, ()>) -> BoxFuture<'_, DispatchResult<u32>> {
            Box::pin(async move { ctx.proceed().await })
        }
    }

    fn builder() -> (PipelineBuilder<Ping>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut container = Container::new();
        container.register(Arc::clone(&recorder));
        container.register_default::<Tag>(Lifetime::Transient);
        container.register_default::<Other>(Lifetime::Transient);

        let mut registry = MiddlewareRegistry::new();
        registry.register::<Tag>().register::<Other>();

        let scope = container.build().create_scope();
        let builder = PipelineBuilder::new(
            Arc::new(registry),
            scope,
            TransportType::in_process(TransportRole::Receiver),
        );
        (builder, recorder)
    }

    fn echo() -> Terminal<Ping> {
        terminal(|message: Ping, _| async move { Ok(message.0) })
    }

    #[test]
    fn test_unknown_middleware_rejected() {
        struct Unregistered;
        impl Middleware<Ping> for Unregistered {
            type Configuration = ();
            fn execute(&self, ctx: MiddlewareContext<Ping, ()>) -> BoxFuture<'_, DispatchResult<u32>> {
                Box::pin(async move { ctx.proceed().await })
            }
        }

        let (mut builder, _) = builder();
        let error = builder.use_middleware::<Unregistered>(()).err().unwrap();
        assert!(matches!(
            error,
            DispatchError::Configuration(ConfigurationError::UnknownMiddleware { .. })
        ));
    }

    #[test]
    fn test_duplicate_requires_allow_multiple() {
        let (mut builder, _) = builder();
        builder.use_middleware::<Tag>("a".into()).unwrap();

        let error = builder.use_middleware::<Tag>("b".into()).err().unwrap();
        assert!(matches!(
            error,
            DispatchError::Configuration(ConfigurationError::DuplicateMiddleware { .. })
        ));

        builder.use_allow_multiple::<Tag>("b".into()).unwrap();
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_configure_unused_middleware_fails() {
        let (mut builder, _) = builder();
        builder.use_middleware_default::<Other>().unwrap();

        let error = builder.configure::<Tag, _>(|_| {}).err().unwrap();
        assert!(matches!(
            error,
            DispatchError::Configuration(ConfigurationError::MiddlewareNotUsed { .. })
        ));
    }

    #[test]
    fn test_failed_configure_leaves_builder_unchanged() {
        let mut registry = MiddlewareRegistry::new();
        registry.register::<Tag>().register_derived::<Other, Tag>();
        let scope = Container::new().build().create_scope();
        let mut builder = PipelineBuilder::<Ping>::new(
            Arc::new(registry),
            scope,
            TransportType::in_process(TransportRole::Receiver),
        );
        builder
            .use_middleware::<Tag>("before".into())
            .unwrap()
            .use_middleware_default::<Other>()
            .unwrap();

        let error = builder
            .configure::<Tag, _>(|label: &mut String| label.push_str("-after"))
            .err()
            .unwrap();

        assert!(matches!(
            error,
            DispatchError::Configuration(ConfigurationError::ConfigurationTypeMismatch { .. })
        ));
        let first = builder.iter().next().unwrap();
        assert_eq!(first.configuration::<String>().map(String::as_str), Some("before"));
    }

    #[test]
    fn test_iter_exposes_configuration() {
        let (mut builder, _) = builder();
        builder
            .use_middleware::<Tag>("first".into())
            .unwrap()
            .use_middleware_default::<Other>()
            .unwrap();

        let entries: Vec<_> = builder.iter().collect();
        assert!(entries[0].is::<Tag>());
        assert_eq!(entries[0].configuration::<String>().map(String::as_str), Some("first"));
        assert!(entries[1].is::<Other>());
        assert!(entries[1].configuration::<String>().is_none());
    }

    #[tokio::test]
    async fn test_entries_run_in_insertion_order() {
        let (mut builder, recorder) = builder();
        builder
            .use_middleware::<Tag>("one".into())
            .unwrap()
            .use_middleware_default::<Other>()
            .unwrap()
            .use_allow_multiple::<Tag>("two".into())
            .unwrap();

        let pipeline = builder.build();
        let response = pipeline
            .execute(Ping(7), CancellationToken::new(), echo())
            .await
            .unwrap();

        assert_eq!(response, 7);
        assert_eq!(*recorder.seen.lock(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_terminal() {
        let (builder, _) = builder();
        let pipeline = builder.build();
        assert!(pipeline.is_empty());

        let response = pipeline
            .execute(Ping(3), CancellationToken::new(), echo())
            .await
            .unwrap();
        assert_eq!(response, 3);
    }

    #[tokio::test]
    async fn test_terminal_error_is_returned_unchanged() {
        let (mut builder, _) = builder();
        builder.use_middleware::<Tag>("x".into()).unwrap();
        let pipeline = builder.build();

        let failure = DispatchError::msg("handler failed");
        let expected = failure.clone();
        let failing: Terminal<Ping> = Arc::new(move |_: Ping, _: CancellationToken| -> BoxFuture<'static, DispatchResult<u32>> {
            let failure = failure.clone();
            Box::pin(async move { Err(failure) })
        });

        let error = pipeline
            .execute(Ping(1), CancellationToken::new(), failing)
            .await
            .unwrap_err();
        assert!(error.same_as(&expected));
    }

    #[tokio::test]
    async fn test_current_message_and_response_recorded() {
        let (builder, _) = builder();
        let pipeline = builder.build();
        let context = emissary_core::DispatchContext::new();

        propagation::scope(context.clone(), async {
            pipeline
                .execute(Ping(9), CancellationToken::new(), echo())
                .await
                .unwrap();
        })
        .await;

        assert_eq!(context.current_message::<Ping>().map(|m| m.0), Some(9));
        assert_eq!(context.current_response::<u32>(), Some(9));
    }
}
