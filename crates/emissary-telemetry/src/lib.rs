//! Structured logging setup for Emissary.
//!
//! Library crates in this workspace only emit `tracing` events. Applications
//! call [`init_logging`] once at startup to install a subscriber that writes
//! those events as JSON or human-readable text.
//!
//! # Example
//!
//! ```rust,ignore
//! use emissary_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(message_type = "CreateOrder", "dispatching");
//! ```

#![doc(html_root_url = "https://docs.rs/emissary-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, fields, init_logging, LogConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
