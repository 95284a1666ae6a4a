//! Built-in middleware.
//!
//! - [`logging`] - Structured logging of messages, responses, and failures

pub mod logging;

pub use logging::LoggingMiddleware;
