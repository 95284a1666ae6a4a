//! # Emissary Core
//!
//! Core types and traits for the Emissary message dispatch framework.
//!
//! This crate provides the foundational types used throughout Emissary:
//!
//! - [`Message`] - Commands, queries and event notifications, with their response type
//! - [`DispatchError`] - Standard error taxonomy (configuration, handler, cancellation, aggregate)
//! - [`DispatchContext`] - Per-call ambient context carrying ids and context data
//! - [`propagation`] - Task-local propagation of the ambient context across `await` points
//! - [`di`] - Scoped service resolution used to create handlers and middleware
//! - [`TransportType`] - Which side of a transport the current code runs on
//!
//! Nothing in this crate performs I/O. Every operation is caller-driven.

#![doc(html_root_url = "https://docs.rs/emissary-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cancellation;
mod context;
pub mod di;
mod error;
mod format;
mod message;
pub mod propagation;
mod transport;

use std::future::Future;
use std::pin::Pin;

pub use context::{ContextData, ContextEntry, ContextValue, DataScope, DispatchContext};
pub use error::{
    AggregateError, CancellationError, ConfigurationError, DispatchError, DispatchResult,
    ErrorKind, HandlerError,
};
pub use format::ContextDataFormatError;
pub use message::{has_unit_response, Message, MessageKind};
pub use tokio_util::sync::CancellationToken;
pub use transport::{TransportRole, TransportType, IN_PROCESS_TRANSPORT};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
