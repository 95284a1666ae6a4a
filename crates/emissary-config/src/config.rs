//! Main configuration types.
//!
//! This module provides the top-level [`EmissaryConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{BroadcastingConfig, LoggingMiddlewareConfig, TelemetryConfigSection};

/// Complete Emissary configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use emissary_config::{BroadcastingMode, EmissaryConfig};
///
/// let config = EmissaryConfig::default();
/// assert_eq!(config.broadcasting.strategy, BroadcastingMode::Sequential);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct EmissaryConfig {
    /// Event notification broadcasting defaults.
    #[serde(default)]
    pub broadcasting: BroadcastingConfig,

    /// Logging middleware defaults.
    #[serde(default)]
    pub logging_middleware: LoggingMiddlewareConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl EmissaryConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> EmissaryConfigBuilder {
        EmissaryConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The parallelism cap is below one
    /// - The log filter is empty while logging is enabled
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        self.broadcasting.validate()?;

        if self.telemetry.logging.enabled && self.telemetry.logging.level.trim().is_empty() {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.logging.level",
                "must not be empty when logging is enabled",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// - Pretty log output with source locations
    /// - Debug log level
    /// - Indented payloads in the logging middleware
    ///
    /// # Example
    ///
    /// ```
    /// use emissary_config::EmissaryConfig;
    ///
    /// let config = EmissaryConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = crate::LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config.telemetry.environment = "development".to_string();

        config.logging_middleware.message_payload = crate::PayloadLogging::IndentedJson;
        config.logging_middleware.response_payload = crate::PayloadLogging::IndentedJson;

        config
    }

    /// Create a production configuration preset.
    ///
    /// - JSON log output
    /// - Info log level
    /// - Response payloads left out of logs
    ///
    /// # Example
    ///
    /// ```
    /// use emissary_config::EmissaryConfig;
    ///
    /// let config = EmissaryConfig::production();
    /// assert_eq!(config.telemetry.logging.format, emissary_config::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = crate::LogFormat::Json;
        config.telemetry.environment = "production".to_string();

        config.logging_middleware.response_payload = crate::PayloadLogging::Omit;

        config
    }
}

/// Builder for [`EmissaryConfig`].
#[derive(Debug, Default)]
pub struct EmissaryConfigBuilder {
    broadcasting: Option<BroadcastingConfig>,
    logging_middleware: Option<LoggingMiddlewareConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl EmissaryConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broadcasting configuration.
    #[must_use]
    pub fn broadcasting(mut self, broadcasting: BroadcastingConfig) -> Self {
        self.broadcasting = Some(broadcasting);
        self
    }

    /// Set the logging middleware configuration.
    #[must_use]
    pub fn logging_middleware(mut self, logging_middleware: LoggingMiddlewareConfig) -> Self {
        self.logging_middleware = Some(logging_middleware);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> EmissaryConfig {
        EmissaryConfig {
            broadcasting: self.broadcasting.unwrap_or_default(),
            logging_middleware: self.logging_middleware.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<EmissaryConfig, crate::ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
