//! Handler registration and configuration-driven defaults.

use emissary_config::{EmissaryConfig, LogLevel, LoggingMiddlewareConfig, PayloadLogging};
use emissary_core::{
    CancellationToken, ConfigurationError, DispatchError, DispatchResult, Message, MessageKind,
};
use emissary_dispatch::{DispatchScopeExt, Handler, ServiceCollection};
use emissary_middleware::{LoggingPipelineExt, PipelineBuilder};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
struct Greet {
    name: String,
}

impl Message for Greet {
    type Response = String;
    const KIND: MessageKind = MessageKind::Query;
}

#[derive(Default)]
struct GreetHandler;

impl Handler<Greet> for GreetHandler {
    async fn handle(&self, message: Greet, _: CancellationToken) -> DispatchResult<String> {
        if message.name.is_empty() {
            return Err(DispatchError::msg("nobody to greet"));
        }
        Ok(format!("hi {}", message.name))
    }

    fn configure_pipeline(pipeline: &mut PipelineBuilder<Greet>) -> DispatchResult<()> {
        pipeline.use_logging_defaults()?;
        Ok(())
    }
}

fn config() -> EmissaryConfig {
    EmissaryConfig {
        logging_middleware: LoggingMiddlewareConfig {
            pre_execution_level: LogLevel::Debug,
            post_execution_level: LogLevel::Debug,
            error_level: LogLevel::Warn,
            message_payload: PayloadLogging::Omit,
            response_payload: PayloadLogging::MinimalJson,
        },
        ..Default::default()
    }
}

#[test]
fn test_registration_describes_typed_handler() {
    let mut services = ServiceCollection::new();
    services.add_handler::<Greet, GreetHandler>().unwrap();

    let registrations = services.handlers().registrations_for::<Greet>();
    assert_eq!(registrations.len(), 1);

    let registration = registrations[0];
    assert!(registration.message_type.ends_with("Greet"));
    assert_eq!(registration.kind, MessageKind::Query);
    assert!(registration.response_type.is_some());
    assert!(registration.handler_type.is_some_and(|name| name.ends_with("GreetHandler")));
    assert!(registration.has_pipeline);
}

#[test]
fn test_second_typed_handler_for_query_is_rejected() {
    #[derive(Default)]
    struct OtherHandler;

    impl Handler<Greet> for OtherHandler {
        async fn handle(&self, _: Greet, _: CancellationToken) -> DispatchResult<String> {
            Ok(String::new())
        }
    }

    let mut services = ServiceCollection::new();
    services.add_handler::<Greet, GreetHandler>().unwrap();
    let error = services.add_handler::<Greet, OtherHandler>().unwrap_err();

    assert!(matches!(
        error,
        DispatchError::Configuration(ConfigurationError::DuplicateHandler { .. })
    ));
    assert_eq!(services.handlers().len(), 1);
}

#[tokio::test]
async fn test_logging_defaults_come_from_config() {
    let mut services = ServiceCollection::new();
    services.add_handler::<Greet, GreetHandler>().unwrap();
    services.apply_config(&config()).unwrap();
    let scope = services.build().create_scope();

    let levels: Arc<Mutex<Vec<(LogLevel, LogLevel, LogLevel)>>> = Arc::default();
    let payloads: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let client = {
        let levels = Arc::clone(&levels);
        let payloads = Arc::clone(&payloads);
        scope.message_client::<Greet>().unwrap().with_pipeline(move |pipeline| {
            pipeline.use_logging_defaults()?;
            let levels = Arc::clone(&levels);
            let payloads = Arc::clone(&payloads);
            pipeline.configure_logging(move |logging| {
                levels.lock().push((
                    logging.pre_execution_level,
                    logging.post_execution_level,
                    logging.error_level,
                ));
                let pre = Arc::clone(&payloads);
                let post = Arc::clone(&payloads);
                *logging = logging
                    .clone()
                    .with_pre_execution_hook(move |record| {
                        pre.lock().push(record.payload.map(str::to_owned));
                        true
                    })
                    .with_post_execution_hook(move |record| {
                        post.lock().push(record.payload.map(str::to_owned));
                        true
                    });
            })?;
            Ok(())
        })
    };

    let response = client
        .handle(Greet { name: "ada".into() }, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response, "hi ada");
    assert_eq!(*levels.lock(), vec![(LogLevel::Debug, LogLevel::Debug, LogLevel::Warn)]);
    assert_eq!(*payloads.lock(), vec![None, Some(r#""hi ada""#.to_owned())]);
}

#[tokio::test]
async fn test_logged_handler_error_is_returned_unchanged() {
    let mut services = ServiceCollection::new();
    services.add_handler::<Greet, GreetHandler>().unwrap();
    services.apply_config(&config()).unwrap();
    let scope = services.build().create_scope();

    let error = scope
        .message_client::<Greet>()
        .unwrap()
        .handle(Greet { name: String::new() }, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "nobody to greet");
}
