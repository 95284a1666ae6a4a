//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{
    BroadcastingMode, ConfigError, EmissaryConfig, FailurePolicySetting, LogFormat, LogLevel,
    PayloadLogging,
};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// # Example
///
/// ```no_run
/// use emissary_config::ConfigLoader;
///
/// # fn main() -> Result<(), emissary_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("emissary.toml")?
///     .with_env_prefix("EMISSARY")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: EmissaryConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EmissaryConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    ///
    /// This is called automatically by `new()`, but can be chained for clarity.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = EmissaryConfig::default();
        self
    }

    /// Start with development preset configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use emissary_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = EmissaryConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = EmissaryConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats.
    /// The file format is determined by the file extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields (strict mode)
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from an optional file.
    ///
    /// If the file exists, loads it. If not, silently continues.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// # Arguments
    ///
    /// * `content` - Configuration content as a string
    /// * `format` - File format ("toml" or "json")
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use emissary_config::{BroadcastingMode, ConfigLoader};
    ///
    /// let toml = r#"
    ///     [broadcasting]
    ///     strategy = "parallel"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.broadcasting.strategy, BroadcastingMode::Parallel);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`.
    /// For example, with prefix "EMISSARY":
    /// - `EMISSARY__BROADCASTING__STRATEGY=parallel`
    /// - `EMISSARY__TELEMETRY__LOGGING__LEVEL=debug`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file from the current directory, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Load environment variables from a specific `.env` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file cannot be read or parsed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref())?;
        Ok(self)
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Environment variable parsing fails
    /// - Configuration validation fails
    pub fn load(mut self) -> Result<EmissaryConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> EmissaryConfig {
        self.config
    }

    // Parse configuration file based on extension
    fn parse_file(content: &str, path: &Path) -> Result<EmissaryConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();

        match parts.as_slice() {
            // Broadcasting section
            ["BROADCASTING", "STRATEGY"] => {
                self.config.broadcasting.strategy = match value.to_lowercase().as_str() {
                    "sequential" => BroadcastingMode::Sequential,
                    "parallel" => BroadcastingMode::Parallel,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'sequential' or 'parallel'",
                        ))
                    }
                };
            }
            ["BROADCASTING", "FAILURE_POLICY"] => {
                self.config.broadcasting.failure_policy = match value.to_lowercase().as_str() {
                    "throw_on_first_error" => FailurePolicySetting::ThrowOnFirstError,
                    "throw_after_all" => FailurePolicySetting::ThrowAfterAll,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'throw_on_first_error' or 'throw_after_all'",
                        ))
                    }
                };
            }
            ["BROADCASTING", "MAX_DEGREE_OF_PARALLELISM"] => {
                self.config.broadcasting.max_degree_of_parallelism =
                    if value.is_empty() || value.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        Some(value.parse().map_err(|_| {
                            ConfigError::env_parse_error(key, "expected integer or 'none'")
                        })?)
                    };
            }

            // Logging middleware section
            ["LOGGING_MIDDLEWARE", "PRE_EXECUTION_LEVEL"] => {
                self.config.logging_middleware.pre_execution_level = parse_level(key, value)?;
            }
            ["LOGGING_MIDDLEWARE", "POST_EXECUTION_LEVEL"] => {
                self.config.logging_middleware.post_execution_level = parse_level(key, value)?;
            }
            ["LOGGING_MIDDLEWARE", "ERROR_LEVEL"] => {
                self.config.logging_middleware.error_level = parse_level(key, value)?;
            }
            ["LOGGING_MIDDLEWARE", "MESSAGE_PAYLOAD"] => {
                self.config.logging_middleware.message_payload = parse_payload(key, value)?;
            }
            ["LOGGING_MIDDLEWARE", "RESPONSE_PAYLOAD"] => {
                self.config.logging_middleware.response_payload = parse_payload(key, value)?;
            }

            // Telemetry section
            ["TELEMETRY", "SERVICE_NAME"] => {
                self.config.telemetry.service_name = value.to_string();
            }
            ["TELEMETRY", "ENVIRONMENT"] => {
                self.config.telemetry.environment = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                self.config.telemetry.logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                self.config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                self.config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "SPAN_EVENTS"] => {
                self.config.telemetry.logging.span_events = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                self.config.telemetry.logging.include_location = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

fn parse_level(key: &str, value: &str) -> Result<LogLevel, ConfigError> {
    value
        .parse()
        .map_err(|reason: String| ConfigError::env_parse_error(key, reason))
}

fn parse_payload(key: &str, value: &str) -> Result<PayloadLogging, ConfigError> {
    value
        .parse()
        .map_err(|reason: String| ConfigError::env_parse_error(key, reason))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
