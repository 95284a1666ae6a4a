//! Structured logging initialisation.
//!
//! Builds a `tracing-subscriber` registry with an [`EnvFilter`] and either a
//! JSON or a pretty formatting layer.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use emissary_config::{LogFormat, TelemetryConfigSection};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Log filter (e.g., "info" or "emissary_dispatch=debug,warn").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Service name for log fields.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
            service_name: "emissary".to_string(),
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

impl From<&TelemetryConfigSection> for LogConfig {
    fn from(section: &TelemetryConfigSection) -> Self {
        Self {
            enabled: section.logging.enabled,
            level: section.logging.level.clone(),
            json_format: section.logging.format == LogFormat::Json,
            span_events: section.logging.span_events,
            file_line_info: section.logging.include_location,
            include_target: true,
            service_name: section.service_name.clone(),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Does nothing when logging is disabled.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` for an invalid filter and
/// `TelemetryError::LoggingInit` if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::debug!(service = %config.service_name, "logging initialized");
    Ok(())
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is empty or invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    if filter.trim().is_empty() {
        return Err(TelemetryError::InvalidConfig("empty log filter".to_string()));
    }
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::InvalidConfig(format!("Invalid log level: {e}")))
}

/// Standard log field names used by Emissary.
pub mod fields {
    /// Message id field name.
    pub const MESSAGE_ID: &str = "message_id";

    /// Trace id field name.
    pub const TRACE_ID: &str = "trace_id";

    /// Message type field name.
    pub const MESSAGE_TYPE: &str = "message_type";

    /// Transport name field name.
    pub const TRANSPORT: &str = "transport";

    /// Transport role field name.
    pub const TRANSPORT_ROLE: &str = "transport_role";

    /// Serialized payload field name.
    pub const PAYLOAD: &str = "payload";

    /// Duration field name (in milliseconds).
    pub const DURATION_MS: &str = "duration_ms";

    /// Error field name.
    pub const ERROR: &str = "error";

    /// Handler type field name.
    pub const HANDLER: &str = "handler";

    /// Service name field name.
    pub const SERVICE_NAME: &str = "service.name";
}
