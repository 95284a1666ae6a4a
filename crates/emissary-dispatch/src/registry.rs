//! Handler registry.
//!
//! Maps each message type to the handlers registered for it. Commands and
//! queries have at most one handler; event notifications have any number.
//!
//! Registering the same handler type twice for one message type replaces
//! the earlier registration. Registering a second, different handler for a
//! command or query fails with `DuplicateHandler`.

use crate::handler::DynHandler;
use emissary_core::{has_unit_response, ConfigurationError, DispatchResult, Message, MessageKind};
use indexmap::IndexMap;
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

/// Identity of a handler, used to detect re-registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum HandlerIdentity {
    /// A typed handler.
    Type(TypeId),
    /// A delegate; every delegate registration is distinct.
    Delegate(u64),
}

/// Describes one registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    /// Message type name.
    pub message_type: &'static str,
    /// Response type name; `None` for messages without a response.
    pub response_type: Option<&'static str>,
    /// Kind of the message.
    pub kind: MessageKind,
    /// Handler type name; `None` for delegate handlers.
    pub handler_type: Option<&'static str>,
    /// Whether the handler configures a receiver pipeline.
    pub has_pipeline: bool,
}

struct Binding {
    identity: HandlerIdentity,
    registration: HandlerRegistration,
    // Holds an `Arc<dyn DynHandler<M>>` for the binding's message type.
    handler: Arc<dyn Any + Send + Sync>,
}

/// All handler registrations of an application.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: IndexMap<TypeId, Vec<Binding>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add<M: Message>(
        &mut self,
        identity: HandlerIdentity,
        handler: Arc<dyn DynHandler<M>>,
    ) -> DispatchResult<()> {
        let registration = HandlerRegistration {
            message_type: M::type_name(),
            response_type: (!has_unit_response::<M>()).then(type_name::<M::Response>),
            kind: M::KIND,
            handler_type: match identity {
                HandlerIdentity::Type(_) => Some(handler.handler_type()),
                HandlerIdentity::Delegate(_) => None,
            },
            has_pipeline: handler.has_pipeline(),
        };
        let binding = Binding {
            identity,
            registration,
            handler: Arc::new(handler),
        };

        let bindings = self.bindings.entry(TypeId::of::<M>()).or_default();

        if let Some(existing) = bindings.iter_mut().find(|b| b.identity == identity) {
            tracing::debug!(
                message_type = M::type_name(),
                handler = binding.registration.handler_type,
                "handler registration replaced"
            );
            *existing = binding;
            return Ok(());
        }

        if !M::KIND.allows_multiple_handlers() {
            if let Some(existing) = bindings.first() {
                return Err(ConfigurationError::DuplicateHandler {
                    message_type: M::type_name(),
                    existing: existing.registration.handler_type.unwrap_or("<delegate>"),
                    attempted: binding.registration.handler_type.unwrap_or("<delegate>"),
                }
                .into());
            }
        }

        tracing::debug!(
            message_type = M::type_name(),
            kind = %M::KIND,
            handler = binding.registration.handler_type,
            "handler registered"
        );
        bindings.push(binding);
        Ok(())
    }

    /// All registrations, grouped by message type in registration order.
    pub fn registrations(&self) -> impl Iterator<Item = &HandlerRegistration> {
        self.bindings
            .values()
            .flat_map(|bindings| bindings.iter().map(|b| &b.registration))
    }

    /// Registrations for message type `M`, in registration order.
    #[must_use]
    pub fn registrations_for<M: Message>(&self) -> Vec<&HandlerRegistration> {
        self.bindings
            .get(&TypeId::of::<M>())
            .map(|bindings| bindings.iter().map(|b| &b.registration).collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `M` has at least one handler.
    #[must_use]
    pub fn contains<M: Message>(&self) -> bool {
        self.bindings
            .get(&TypeId::of::<M>())
            .is_some_and(|bindings| !bindings.is_empty())
    }

    /// Number of registrations across all message types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers for `M`, in registration order.
    pub(crate) fn handlers_for<M: Message>(&self) -> Vec<Arc<dyn DynHandler<M>>> {
        self.bindings
            .get(&TypeId::of::<M>())
            .map(|bindings| {
                bindings
                    .iter()
                    .filter_map(|b| b.handler.downcast_ref::<Arc<dyn DynHandler<M>>>().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The single handler of a command or query.
    pub(crate) fn single_handler<M: Message>(&self) -> DispatchResult<Arc<dyn DynHandler<M>>> {
        self.handlers_for::<M>()
            .into_iter()
            .next()
            .ok_or_else(|| {
                ConfigurationError::NoHandler {
                    message_type: M::type_name(),
                }
                .into()
            })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registrations", &self.registrations().collect::<Vec<_>>())
            .finish()
    }
}
