//! # Emissary
//!
//! **Typed command, query and event notification dispatch with middleware
//! pipelines**
//!
//! Emissary routes strongly-typed messages to their handlers:
//!
//! - **Commands and queries** have exactly one handler and may return a
//!   response
//! - **Event notifications** have any number of handlers, run by a
//!   broadcasting strategy
//! - **Middleware** wraps every call on the sending side and on the
//!   receiving side, and may observe, rewrite, retry or short-circuit it
//! - **Dispatch context** follows a call across `await` points and nested
//!   calls, carrying correlation ids and key/value data
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use emissary::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct GetGreeting(String);
//!
//! impl Message for GetGreeting {
//!     type Response = String;
//!     const KIND: MessageKind = MessageKind::Query;
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut services = ServiceCollection::new();
//!     services.add_handler_fn(|query: GetGreeting, _scope, _token| async move {
//!         Ok(format!("hello, {}", query.0))
//!     })?;
//!
//!     let scope = services.build().create_scope();
//!     let greeting = scope
//!         .message_client::<GetGreeting>()?
//!         .handle(GetGreeting("world".into()), CancellationToken::new())
//!         .await?;
//!     assert_eq!(greeting, "hello, world");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! caller → sender pipeline → transport → receiver pipeline → handler
//!                                      ↘ broadcasting strategy → N × (receiver pipeline → handler)
//! ```

#![doc(html_root_url = "https://docs.rs/emissary/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use emissary_core as core;

// Re-export middleware types
pub use emissary_middleware as middleware;

// Re-export broadcasting strategies
pub use emissary_broadcast as broadcast;

// Re-export handler registration and dispatch
pub use emissary_dispatch as dispatch;

// Re-export configuration
pub use emissary_config as config;

// Re-export logging setup
pub use emissary_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use emissary::prelude::*;
/// ```
pub mod prelude {
    pub use emissary_core::{
        BoxFuture, CancellationToken, ContextData, DataScope, DispatchContext, DispatchError,
        DispatchResult, Message, MessageKind, TransportRole, TransportType,
    };

    // Re-export context propagation
    pub use emissary_core::propagation::{self, Propagation};

    // Re-export DI types
    pub use emissary_core::di::{Lifetime, ServiceProvider, ServiceScope};

    // Re-export middleware types
    pub use emissary_middleware::{
        LoggingConfiguration, LoggingMiddleware, LoggingPipelineExt, Middleware, MiddlewareContext,
        PipelineBuilder,
    };

    // Re-export broadcasting types
    pub use emissary_broadcast::{
        BroadcastRequest, BroadcastingStrategy, FailurePolicy, HandlerInvoker,
        ParallelBroadcastingStrategy, SequentialBroadcastingStrategy,
    };

    // Re-export dispatch types
    pub use emissary_dispatch::{
        DispatchScopeExt, EventPublisher, Handler, MessageClient, MessageClients,
        ServiceCollection, TransportClient,
    };

    // Re-export configuration types
    pub use emissary_config::{ConfigLoader, EmissaryConfig};
}
