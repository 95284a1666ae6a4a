//! Error types for Emissary.
//!
//! [`DispatchError`] is the single error type returned by every dispatch
//! operation. Its variants follow the error taxonomy of the pipeline:
//!
//! | Variant | Raised by | When |
//! |---|---|---|
//! | `Configuration` | registration, pipeline building | unknown/duplicate middleware, duplicate handler, ... |
//! | `InvalidArgument` | strategy construction | e.g. a parallelism degree below one |
//! | `Resolution` | service scopes | a service is not registered or its factory failed |
//! | `Handler` | handlers and middleware | any application failure |
//! | `Cancelled` | handlers and middleware | code observed a cancelled token |
//! | `Aggregate` | broadcasting strategies | two or more handlers failed |
//!
//! Errors are cheap to clone. A handler error keeps its identity when it is
//! propagated, so callers can check that they received the very error a
//! handler raised with [`DispatchError::same_as`].

use crate::format::ContextDataFormatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using [`DispatchError`].
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Coarse classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid registration or pipeline configuration.
    Configuration,
    /// An argument failed validation.
    InvalidArgument,
    /// A service could not be resolved.
    Resolution,
    /// Application code failed.
    Handler,
    /// Application code observed cancellation.
    Cancellation,
    /// Several independent failures.
    Aggregate,
    /// Encoded context data could not be parsed.
    ContextFormat,
}

/// Standard error type for Emissary.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// Registration or pipeline configuration is invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// An argument was rejected before any work started.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Name of the argument.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A service could not be resolved from the active scope.
    #[error("failed to resolve {type_name}: {reason}")]
    Resolution {
        /// The type that could not be resolved.
        type_name: &'static str,
        /// The reason for the failure.
        reason: String,
    },

    /// Handler or middleware code failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Handler or middleware code observed a cancelled token.
    #[error(transparent)]
    Cancelled(#[from] CancellationError),

    /// Two or more handler invocations of one broadcast failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Encoded context data was malformed.
    #[error(transparent)]
    ContextFormat(#[from] ContextDataFormatError),
}

impl DispatchError {
    /// Wraps an application error.
    pub fn handler<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler(HandlerError::new(anyhow::Error::new(error)))
    }

    /// Creates an application error from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Handler(HandlerError::new(anyhow::Error::msg(message)))
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Cancelled(CancellationError::default())
    }

    /// Creates a cancellation error with a reason.
    pub fn cancelled_because(reason: impl Into<String>) -> Self {
        Self::Cancelled(CancellationError::with_reason(reason))
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Creates a resolution error for a service that is not registered.
    #[must_use]
    pub fn not_registered<T: ?Sized>() -> Self {
        Self::Resolution {
            type_name: std::any::type_name::<T>(),
            reason: "service not registered".to_string(),
        }
    }

    /// Creates a resolution error with a custom reason.
    pub fn resolution<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self::Resolution {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Handler(_) => ErrorKind::Handler,
            Self::Cancelled(_) => ErrorKind::Cancellation,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::ContextFormat(_) => ErrorKind::ContextFormat,
        }
    }

    /// Returns `true` if this error reports observed cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` if this error is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns the inner errors of an aggregate error.
    #[must_use]
    pub fn aggregated(&self) -> Option<&[DispatchError]> {
        match self {
            Self::Aggregate(aggregate) => Some(aggregate.inner()),
            _ => None,
        }
    }

    /// Attempts to downcast a handler error to its concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Handler(error) => error.inner().downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns `true` if both values are the same propagated error.
    ///
    /// Handler errors compare by identity. Aggregates compare element-wise.
    /// Every other variant compares as different.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Handler(a), Self::Handler(b)) => a.ptr_eq(b),
            (Self::Aggregate(a), Self::Aggregate(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_as(y))
            }
            _ => false,
        }
    }
}

impl From<anyhow::Error> for DispatchError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(inner) => inner,
            Err(error) => Self::Handler(HandlerError::new(error)),
        }
    }
}

/// An application failure raised by handler or middleware code.
///
/// The wrapped error is shared, so clones of a `HandlerError` refer to the
/// same underlying error.
#[derive(Clone)]
pub struct HandlerError(Arc<anyhow::Error>);

impl HandlerError {
    /// Wraps an `anyhow::Error`.
    #[must_use]
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Returns the wrapped error.
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Returns `true` if both values wrap the same error instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerError").field(&*self.0).finish()
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Raised when code observes a cancelled token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancellationError {
    reason: Option<String>,
}

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "operation was cancelled: {reason}"),
            None => f.write_str("operation was cancelled"),
        }
    }
}

impl std::error::Error for CancellationError {}

impl CancellationError {
    /// Creates a cancellation error with a reason.
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    /// Returns the cancellation reason, if one was given.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Two or more failures from independent handler invocations.
#[derive(Debug, Clone)]
pub struct AggregateError {
    errors: Vec<DispatchError>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handler invocations failed", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl AggregateError {
    /// Creates an aggregate from its inner errors.
    #[must_use]
    pub fn new(errors: Vec<DispatchError>) -> Self {
        Self { errors }
    }

    /// Returns the inner errors in the order they were collected.
    #[must_use]
    pub fn inner(&self) -> &[DispatchError] {
        &self.errors
    }

    /// Consumes the aggregate, returning its inner errors.
    #[must_use]
    pub fn into_inner(self) -> Vec<DispatchError> {
        self.errors
    }

    /// Iterates over the inner errors.
    pub fn iter(&self) -> std::slice::Iter<'_, DispatchError> {
        self.errors.iter()
    }

    /// Returns the number of inner errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if there are no inner errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Invalid registration or pipeline configuration.
///
/// These are raised synchronously while registering services or building a
/// pipeline and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The middleware was never registered.
    #[error("middleware {middleware} is not registered")]
    UnknownMiddleware {
        /// Middleware type name.
        middleware: &'static str,
    },

    /// The middleware is already part of the pipeline.
    #[error("middleware {middleware} is already used in this pipeline; use `use_allow_multiple` to add it again")]
    DuplicateMiddleware {
        /// Middleware type name.
        middleware: &'static str,
    },

    /// The middleware to configure is not part of the pipeline.
    #[error("middleware {middleware} is not used in this pipeline")]
    MiddlewareNotUsed {
        /// Middleware type name.
        middleware: &'static str,
    },

    /// A stored configuration does not have the expected type.
    #[error("configuration of middleware {middleware} is not a {expected}")]
    ConfigurationTypeMismatch {
        /// Middleware type name.
        middleware: &'static str,
        /// Expected configuration type name.
        expected: &'static str,
    },

    /// A single-handler message already has a different handler.
    #[error("message {message_type} already has handler {existing}; cannot register {attempted}")]
    DuplicateHandler {
        /// Message type name.
        message_type: &'static str,
        /// The handler that is already registered.
        existing: &'static str,
        /// The handler that was rejected.
        attempted: &'static str,
    },

    /// No handler is registered for a single-handler message.
    #[error("no handler is registered for message {message_type}")]
    NoHandler {
        /// Message type name.
        message_type: &'static str,
    },

    /// The message kind does not fit the requested operation.
    #[error("message {message_type} cannot be used here: {reason}")]
    InvalidMessageKind {
        /// Message type name.
        message_type: &'static str,
        /// What was wrong.
        reason: String,
    },
}
