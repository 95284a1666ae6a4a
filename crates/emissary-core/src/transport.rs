//! Transport types.
//!
//! Every pipeline runs on one side of a transport. The [`TransportType`] is
//! attached to each middleware invocation so middleware can branch on
//! whether it runs client-side or handler-side.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Name of the transport used for calls inside the current process.
pub const IN_PROCESS_TRANSPORT: &str = "in-process";

/// The side of a transport a pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportRole {
    /// Sends a command or query.
    Sender,
    /// Publishes an event notification.
    Publisher,
    /// Receives a message and runs its handler.
    Receiver,
}

impl TransportRole {
    /// Returns the role name as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Publisher => "publisher",
            Self::Receiver => "receiver",
        }
    }
}

/// A transport name and the role of the current side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportType {
    name: Cow<'static, str>,
    role: TransportRole,
}

impl TransportType {
    /// Creates a transport type.
    pub fn new(name: impl Into<Cow<'static, str>>, role: TransportRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    /// The in-process transport with the given role.
    #[must_use]
    pub const fn in_process(role: TransportRole) -> Self {
        Self {
            name: Cow::Borrowed(IN_PROCESS_TRANSPORT),
            role,
        }
    }

    /// Returns the transport name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the role of the current side.
    #[must_use]
    pub const fn role(&self) -> TransportRole {
        self.role
    }

    /// Returns `true` for the in-process transport.
    #[must_use]
    pub fn is_in_process(&self) -> bool {
        self.name == IN_PROCESS_TRANSPORT
    }

    /// Returns `true` if this side runs the handler.
    #[must_use]
    pub const fn is_receiver(&self) -> bool {
        matches!(self.role, TransportRole::Receiver)
    }

    /// Returns the same transport with another role.
    #[must_use]
    pub fn with_role(&self, role: TransportRole) -> Self {
        Self {
            name: self.name.clone(),
            role,
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process() {
        let sender = TransportType::in_process(TransportRole::Sender);
        assert!(sender.is_in_process());
        assert!(!sender.is_receiver());
        assert_eq!(sender.to_string(), "in-process:sender");

        let receiver = sender.with_role(TransportRole::Receiver);
        assert!(receiver.is_receiver());
        assert_eq!(receiver.name(), IN_PROCESS_TRANSPORT);
    }

    #[test]
    fn test_custom_transport() {
        let http = TransportType::new("http", TransportRole::Sender);
        assert!(!http.is_in_process());
        assert_eq!(http.role(), TransportRole::Sender);
        assert_ne!(http, TransportType::in_process(TransportRole::Sender));
    }
}
