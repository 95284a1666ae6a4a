//! Message model.
//!
//! Every unit of dispatch is a [`Message`]: a plain value type that names its
//! response type and its [`MessageKind`]. Messages carry no pipeline state;
//! that lives in the [`DispatchContext`](crate::DispatchContext).

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;

/// The kind of a message, which decides how many handlers it may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A request to change state. Exactly one handler.
    Command,
    /// A request to read state. Exactly one handler.
    Query,
    /// A notification that something happened. Zero or more handlers.
    EventNotification,
}

impl MessageKind {
    /// Returns `true` if several handlers may be registered for one message type.
    #[must_use]
    pub const fn allows_multiple_handlers(self) -> bool {
        matches!(self, Self::EventNotification)
    }

    /// Returns the kind name as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::EventNotification => "event_notification",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strongly-typed message.
///
/// Fire-and-forget commands and all event notifications use `()` as their
/// response type.
///
/// # Example
///
/// ```
/// use emissary_core::{Message, MessageKind};
///
/// #[derive(Debug, Clone)]
/// struct CreateUser {
///     name: String,
/// }
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct UserCreated {
///     id: u64,
/// }
///
/// impl Message for CreateUser {
///     type Response = UserCreated;
///     const KIND: MessageKind = MessageKind::Command;
/// }
///
/// assert_eq!(CreateUser::KIND, MessageKind::Command);
/// ```
pub trait Message: Clone + Send + Sync + 'static {
    /// The response produced by the handler.
    type Response: Clone + Send + Sync + 'static;

    /// The kind of this message.
    const KIND: MessageKind;

    /// Returns the message type name used in errors and logs.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Returns `true` if `M` produces no response.
#[must_use]
pub fn has_unit_response<M: Message>() -> bool {
    TypeId::of::<M::Response>() == TypeId::of::<()>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Ping;

    impl Message for Ping {
        type Response = ();
        const KIND: MessageKind = MessageKind::Command;
    }

    #[derive(Clone)]
    struct GetCount;

    impl Message for GetCount {
        type Response = u32;
        const KIND: MessageKind = MessageKind::Query;
    }

    #[test]
    fn test_unit_response_detection() {
        assert!(has_unit_response::<Ping>());
        assert!(!has_unit_response::<GetCount>());
    }

    #[test]
    fn test_kind_multiplicity() {
        assert!(!MessageKind::Command.allows_multiple_handlers());
        assert!(!MessageKind::Query.allows_multiple_handlers());
        assert!(MessageKind::EventNotification.allows_multiple_handlers());
    }

    #[test]
    fn test_type_name() {
        assert!(Ping::type_name().ends_with("Ping"));
        assert_eq!(MessageKind::EventNotification.to_string(), "event_notification");
    }
}
