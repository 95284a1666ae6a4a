//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which built-in strategy fans event notifications out to their handlers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastingMode {
    /// One handler at a time, in registration order.
    #[default]
    Sequential,
    /// All handlers concurrently.
    Parallel,
}

/// How the sequential strategy reacts to a failing handler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicySetting {
    /// Stop at the first failure.
    #[default]
    ThrowOnFirstError,
    /// Run every handler, then report all failures.
    ThrowAfterAll,
}

/// Broadcasting configuration section.
///
/// # Example
///
/// ```
/// use emissary_config::{BroadcastingConfig, BroadcastingMode};
///
/// let config = BroadcastingConfig {
///     strategy: BroadcastingMode::Parallel,
///     max_degree_of_parallelism: Some(4),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct BroadcastingConfig {
    /// Default strategy.
    #[serde(default)]
    pub strategy: BroadcastingMode,

    /// Failure policy of the sequential strategy.
    #[serde(default)]
    pub failure_policy: FailurePolicySetting,

    /// Concurrency cap of the parallel strategy. `None` means unlimited.
    #[serde(default)]
    pub max_degree_of_parallelism: Option<i64>,
}

impl BroadcastingConfig {
    /// Validate this section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the parallelism cap is below one.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        match self.max_degree_of_parallelism {
            Some(degree) if degree < 1 => Err(crate::ConfigError::invalid_value(
                "broadcasting.max_degree_of_parallelism",
                format!("must be at least 1, got {degree}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Level of a log line written by the logging middleware.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
    /// Do not log.
    Off,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" | "none" => Ok(Self::Off),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        };
        f.write_str(name)
    }
}

/// How message and response payloads are written to logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadLogging {
    /// Leave the payload out.
    Omit,
    /// Single-line JSON.
    #[default]
    MinimalJson,
    /// Indented JSON.
    IndentedJson,
}

impl FromStr for PayloadLogging {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "omit" => Ok(Self::Omit),
            "minimal_json" => Ok(Self::MinimalJson),
            "indented_json" => Ok(Self::IndentedJson),
            other => Err(format!("unknown payload logging strategy '{other}'")),
        }
    }
}

/// Defaults for the built-in logging middleware.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingMiddlewareConfig {
    /// Level of the line written before the handler runs.
    #[serde(default)]
    pub pre_execution_level: LogLevel,

    /// Level of the line written after the handler succeeded.
    #[serde(default)]
    pub post_execution_level: LogLevel,

    /// Level of the line written when the handler failed.
    #[serde(default = "default_error_level")]
    pub error_level: LogLevel,

    /// How the message payload is logged.
    #[serde(default)]
    pub message_payload: PayloadLogging,

    /// How the response payload is logged.
    #[serde(default)]
    pub response_payload: PayloadLogging,
}

impl Default for LoggingMiddlewareConfig {
    fn default() -> Self {
        Self {
            pre_execution_level: LogLevel::Info,
            post_execution_level: LogLevel::Info,
            error_level: default_error_level(),
            message_payload: PayloadLogging::MinimalJson,
            response_payload: PayloadLogging::MinimalJson,
        }
    }
}

const fn default_error_level() -> LogLevel {
    LogLevel::Error
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log filter (e.g. "info" or "emissary=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Emit span open/close events.
    #[serde(default)]
    pub span_events: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            span_events: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name attached to log output.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment (e.g., "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "emissary-service".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcasting_config_default() {
        let config = BroadcastingConfig::default();
        assert_eq!(config.strategy, BroadcastingMode::Sequential);
        assert_eq!(config.failure_policy, FailurePolicySetting::ThrowOnFirstError);
        assert_eq!(config.max_degree_of_parallelism, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broadcasting_config_deserialize() {
        let toml = r#"
            strategy = "parallel"
            failure_policy = "throw_after_all"
            max_degree_of_parallelism = 2
        "#;
        let config: BroadcastingConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.strategy, BroadcastingMode::Parallel);
        assert_eq!(config.failure_policy, FailurePolicySetting::ThrowAfterAll);
        assert_eq!(config.max_degree_of_parallelism, Some(2));
    }

    #[test]
    fn test_broadcasting_config_rejects_zero_degree() {
        for degree in [0, -1] {
            let config = BroadcastingConfig {
                max_degree_of_parallelism: Some(degree),
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_broadcasting_config_unknown_field_rejected() {
        let result: Result<BroadcastingConfig, _> = toml::from_str("workers = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_logging_middleware_config_default() {
        let config = LoggingMiddlewareConfig::default();
        assert_eq!(config.pre_execution_level, LogLevel::Info);
        assert_eq!(config.error_level, LogLevel::Error);
        assert_eq!(config.message_payload, PayloadLogging::MinimalJson);
    }

    #[test]
    fn test_logging_middleware_config_deserialize() {
        let json = r#"{"error_level": "warn", "response_payload": "omit"}"#;
        let config: LoggingMiddlewareConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.error_level, LogLevel::Warn);
        assert_eq!(config.response_payload, PayloadLogging::Omit);
        assert_eq!(config.post_execution_level, LogLevel::Info);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("none".parse::<LogLevel>(), Ok(LogLevel::Off));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_payload_logging_parse() {
        assert_eq!("indented_json".parse::<PayloadLogging>(), Ok(PayloadLogging::IndentedJson));
        assert!("yaml".parse::<PayloadLogging>().is_err());
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfigSection::default();
        assert_eq!(config.service_name, "emissary-service");
        assert!(config.logging.enabled);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
