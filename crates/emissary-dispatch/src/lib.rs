//! # Emissary Dispatch
//!
//! Handlers, message clients and event publishers for the Emissary
//! framework.
//!
//! ## Flow
//!
//! ```text
//! ServiceCollection ──build──▶ ServiceProvider ──create_scope──▶ ServiceScope
//!
//! scope.message_client::<M>()  ─▶ sender pipeline ─▶ transport ─▶ receiver pipeline ─▶ handler
//! scope.event_publisher::<E>() ─▶ publisher pipeline ─▶ broadcasting strategy ─▶ N × (receiver pipeline ─▶ handler)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use emissary_dispatch::{DispatchScopeExt, Handler, ServiceCollection};
//!
//! let mut services = ServiceCollection::new();
//! services.add_handler::<GetUser, GetUserHandler>()?;
//! let scope = services.build().create_scope();
//!
//! let user = scope
//!     .message_client::<GetUser>()?
//!     .with_pipeline(|pipeline| {
//!         pipeline.use_logging_defaults()?;
//!         Ok(())
//!     })
//!     .handle(GetUser { id: 7 }, CancellationToken::new())
//!     .await?;
//! ```

#![doc(html_root_url = "https://docs.rs/emissary-dispatch/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod handler;
pub mod publisher;
pub mod registry;
pub mod services;
pub mod transport;

pub use client::{DispatchScopeExt, MessageClient, MessageClients};
pub use handler::{DynHandler, FnHandler, Handler, PipelineConfigurator};
pub use publisher::{ConfiguredPublisher, EventPublisher, PublisherBuilder};
pub use registry::{HandlerRegistration, HandlerRegistry};
pub use services::ServiceCollection;
pub use transport::{
    FnTransportClient, InProcessTransportClient, TransportClient, TransportClientBuilder,
    TransportClientFactory, TransportRegistry,
};
