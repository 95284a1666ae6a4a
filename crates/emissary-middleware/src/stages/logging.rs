//! Logging middleware.
//!
//! Writes one log event before a message is handled, and one after it
//! completes or fails. Each event carries the message and trace ids, the
//! message type, the transport, and (after the handler) the elapsed time.
//!
//! # Log Fields
//!
//! - `message_id` - Id of the current message, if assigned
//! - `trace_id` - Trace id of the dispatch context
//! - `message_type` - Rust type name of the message
//! - `transport` / `role` - Transport name and role of the pipeline
//! - `payload` - Serialized message or response, unless omitted
//! - `duration_ms` - Time spent in the rest of the chain
//!
//! # Example
//!
//! ```rust,ignore
//! use emissary_middleware::{LoggingPipelineExt, LogLevel};
//!
//! fn configure_pipeline(pipeline: &mut PipelineBuilder<CreateUser>) -> DispatchResult<()> {
//!     pipeline
//!         .use_logging_defaults()?
//!         .configure_logging(|logging| logging.post_execution_level = LogLevel::Debug)?;
//!     Ok(())
//! }
//! ```

use crate::middleware::{Middleware, MiddlewareContext};
use crate::pipeline::PipelineBuilder;
use emissary_config::{LogLevel, LoggingMiddlewareConfig, PayloadLogging};
use emissary_core::{
    has_unit_response, BoxFuture, DispatchError, DispatchResult, Message, TransportType,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => tracing::trace!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Error => tracing::error!($($arg)+),
            LogLevel::Off => {}
        }
    };
}

/// Data passed to logging hooks.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    /// Rust type name of the message.
    pub message_type: &'static str,
    /// Id of the current message, if assigned.
    pub message_id: Option<&'a str>,
    /// Trace id of the dispatch context.
    pub trace_id: &'a str,
    /// Transport of the pipeline.
    pub transport: &'a TransportType,
    /// Serialized message (before) or response (after), if logged.
    pub payload: Option<&'a str>,
    /// Time spent in the rest of the chain; `None` before the handler ran.
    pub elapsed: Option<Duration>,
    /// The failure, for the error event.
    pub error: Option<&'a DispatchError>,
}

/// Hook called before an event is written. Returning `false` suppresses
/// the event.
pub type LogHook = Arc<dyn Fn(&LogRecord<'_>) -> bool + Send + Sync>;

/// Configuration of [`LoggingMiddleware`] in one pipeline.
#[derive(Clone)]
pub struct LoggingConfiguration {
    /// Level of the event written before the handler runs.
    pub pre_execution_level: LogLevel,
    /// Level of the event written after the handler succeeded.
    pub post_execution_level: LogLevel,
    /// Level of the event written when the handler failed.
    pub error_level: LogLevel,
    /// How the message is logged.
    pub message_payload: PayloadLogging,
    /// How the response is logged.
    pub response_payload: PayloadLogging,
    /// Called before the pre-execution event.
    pub pre_execution_hook: Option<LogHook>,
    /// Called before the post-execution event.
    pub post_execution_hook: Option<LogHook>,
    /// Called before the error event.
    pub error_hook: Option<LogHook>,
}

impl LoggingConfiguration {
    /// Sets the pre-execution hook.
    #[must_use]
    pub fn with_pre_execution_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LogRecord<'_>) -> bool + Send + Sync + 'static,
    {
        self.pre_execution_hook = Some(Arc::new(hook));
        self
    }

    /// Sets the post-execution hook.
    #[must_use]
    pub fn with_post_execution_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LogRecord<'_>) -> bool + Send + Sync + 'static,
    {
        self.post_execution_hook = Some(Arc::new(hook));
        self
    }

    /// Sets the error hook.
    #[must_use]
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LogRecord<'_>) -> bool + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self::from(&LoggingMiddlewareConfig::default())
    }
}

impl From<&LoggingMiddlewareConfig> for LoggingConfiguration {
    fn from(config: &LoggingMiddlewareConfig) -> Self {
        Self {
            pre_execution_level: config.pre_execution_level,
            post_execution_level: config.post_execution_level,
            error_level: config.error_level,
            message_payload: config.message_payload,
            response_payload: config.response_payload,
            pre_execution_hook: None,
            post_execution_hook: None,
            error_hook: None,
        }
    }
}

impl std::fmt::Debug for LoggingConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingConfiguration")
            .field("pre_execution_level", &self.pre_execution_level)
            .field("post_execution_level", &self.post_execution_level)
            .field("error_level", &self.error_level)
            .field("message_payload", &self.message_payload)
            .field("response_payload", &self.response_payload)
            .field("pre_execution_hook", &self.pre_execution_hook.is_some())
            .field("post_execution_hook", &self.post_execution_hook.is_some())
            .field("error_hook", &self.error_hook.is_some())
            .finish()
    }
}

/// Logs every message passing through the pipeline.
///
/// Errors are logged and returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl<M> Middleware<M> for LoggingMiddleware
where
    M: Message + Serialize,
    M::Response: Serialize,
{
    type Configuration = LoggingConfiguration;

    fn execute(
        &self,
        ctx: MiddlewareContext<M, LoggingConfiguration>,
    ) -> BoxFuture<'_, DispatchResult<M::Response>> {
        Box::pin(async move {
            let config = ctx.configuration();
            let trace_id = ctx.context().trace_id();
            let message_id = ctx.context().message_id();
            let transport = ctx.transport();

            let payload = if is_observed(config.pre_execution_level, config.pre_execution_hook.as_ref()) {
                render_payload(ctx.message(), config.message_payload)
            } else {
                None
            };
            let record = LogRecord {
                message_type: M::type_name(),
                message_id: message_id.as_deref(),
                trace_id: &trace_id,
                transport,
                payload: payload.as_deref(),
                elapsed: None,
                error: None,
            };
            if should_log(config.pre_execution_hook.as_ref(), &record) {
                log_at!(
                    config.pre_execution_level,
                    message_id = record.message_id,
                    trace_id = %trace_id,
                    message_type = record.message_type,
                    transport = transport.name(),
                    role = transport.role().as_str(),
                    payload = record.payload,
                    "handling message"
                );
            }

            let started = Instant::now();
            let result = ctx.proceed().await;
            let elapsed = started.elapsed();
            let duration_ms = elapsed.as_secs_f64() * 1000.0;

            match &result {
                Ok(response) => {
                    let observed =
                        is_observed(config.post_execution_level, config.post_execution_hook.as_ref());
                    let payload = if has_unit_response::<M>() || !observed {
                        None
                    } else {
                        render_payload(response, config.response_payload)
                    };
                    let record = LogRecord {
                        payload: payload.as_deref(),
                        elapsed: Some(elapsed),
                        ..record
                    };
                    if should_log(config.post_execution_hook.as_ref(), &record) {
                        log_at!(
                            config.post_execution_level,
                            message_id = record.message_id,
                            trace_id = %trace_id,
                            message_type = record.message_type,
                            transport = transport.name(),
                            role = transport.role().as_str(),
                            payload = record.payload,
                            duration_ms,
                            "handled message"
                        );
                    }
                }
                Err(error) => {
                    let record = LogRecord {
                        payload: None,
                        elapsed: Some(elapsed),
                        error: Some(error),
                        ..record
                    };
                    if should_log(config.error_hook.as_ref(), &record) {
                        log_at!(
                            config.error_level,
                            message_id = record.message_id,
                            trace_id = %trace_id,
                            message_type = record.message_type,
                            transport = transport.name(),
                            role = transport.role().as_str(),
                            error = %error,
                            error_kind = ?error.kind(),
                            duration_ms,
                            "message handling failed"
                        );
                    }
                }
            }

            result
        })
    }
}

/// Returns `true` if a log line or a hook will see the event.
fn is_observed(level: LogLevel, hook: Option<&LogHook>) -> bool {
    level != LogLevel::Off || hook.is_some()
}

fn should_log(hook: Option<&LogHook>, record: &LogRecord<'_>) -> bool {
    hook.map_or(true, |hook| hook(record))
}

/// Serializes `value` according to `strategy`.
fn render_payload<T: Serialize>(value: &T, strategy: PayloadLogging) -> Option<String> {
    let rendered = match strategy {
        PayloadLogging::Omit => return None,
        PayloadLogging::MinimalJson => serde_json::to_string(value),
        PayloadLogging::IndentedJson => serde_json::to_string_pretty(value),
    };

    match rendered {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize payload for logging");
            None
        }
    }
}

/// Logging shortcuts for [`PipelineBuilder`].
pub trait LoggingPipelineExt {
    /// Adds [`LoggingMiddleware`] with `configuration`.
    fn use_logging(&mut self, configuration: LoggingConfiguration) -> DispatchResult<&mut Self>;

    /// Adds [`LoggingMiddleware`] with the [`LoggingConfiguration`]
    /// registered in the scope, or the built-in defaults.
    fn use_logging_defaults(&mut self) -> DispatchResult<&mut Self>;

    /// Updates the configuration of every logging entry.
    fn configure_logging<F>(&mut self, update: F) -> DispatchResult<&mut Self>
    where
        F: FnMut(&mut LoggingConfiguration);

    /// Removes every logging entry.
    fn without_logging(&mut self) -> &mut Self;
}

impl<M> LoggingPipelineExt for PipelineBuilder<M>
where
    M: Message + Serialize,
    M::Response: Serialize,
{
    fn use_logging(&mut self, configuration: LoggingConfiguration) -> DispatchResult<&mut Self> {
        self.use_middleware::<LoggingMiddleware>(configuration)
    }

    fn use_logging_defaults(&mut self) -> DispatchResult<&mut Self> {
        let configuration = self
            .scope()
            .resolve::<LoggingConfiguration>()
            .map(|registered| registered.as_ref().clone())
            .unwrap_or_default();
        self.use_logging(configuration)
    }

    fn configure_logging<F>(&mut self, update: F) -> DispatchResult<&mut Self>
    where
        F: FnMut(&mut LoggingConfiguration),
    {
        self.configure::<LoggingMiddleware, F>(update)
    }

    fn without_logging(&mut self) -> &mut Self {
        self.without::<LoggingMiddleware>()
    }
}
