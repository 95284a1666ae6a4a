//! Typed configuration system for Emissary.
//!
//! This crate provides a strongly-typed configuration system for applications
//! built on Emissary with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! The configuration system is built around the [`EmissaryConfig`] struct:
//!
//! - [`BroadcastingConfig`] - Default strategy for event notification fan-out
//! - [`LoggingMiddlewareConfig`] - Defaults for the built-in logging middleware
//! - [`TelemetryConfigSection`] - Log output settings
//!
//! # Example
//!
//! ```no_run
//! use emissary_config::{ConfigLoader, EmissaryConfig};
//!
//! # fn main() -> Result<(), emissary_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("emissary.toml")?
//!     .with_env_prefix("EMISSARY")
//!     .load()?;
//!
//! println!("Broadcasting strategy: {:?}", config.broadcasting.strategy);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [broadcasting]
//! strategy = "parallel"
//! failure_policy = "throw_after_all"
//! max_degree_of_parallelism = 4
//!
//! [logging_middleware]
//! pre_execution_level = "info"
//! post_execution_level = "info"
//! error_level = "error"
//! message_payload = "minimal_json"
//! response_payload = "omit"
//!
//! [telemetry]
//! service_name = "orders"
//! environment = "production"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variables
//!
//! Variables use the format `PREFIX__SECTION__KEY`, for example
//! `EMISSARY__BROADCASTING__STRATEGY=parallel` or
//! `EMISSARY__TELEMETRY__LOGGING__LEVEL=debug`.

#![doc(html_root_url = "https://docs.rs/emissary-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{EmissaryConfig, EmissaryConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BroadcastingConfig, BroadcastingMode, FailurePolicySetting, LogFormat, LogLevel,
    LoggingConfig, LoggingMiddlewareConfig, PayloadLogging, TelemetryConfigSection,
};
