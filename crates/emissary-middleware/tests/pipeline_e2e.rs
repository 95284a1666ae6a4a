//! End-to-end pipeline integration tests.
//!
//! These tests drive built pipelines through the patterns middleware is
//! used for in practice:
//!
//! 1. Retry - continue the chain more than once
//! 2. Short-circuit - answer without reaching the handler
//! 3. Rewrite - continue with a different message or token
//! 4. Lineage - remove or configure middleware through a base type

use emissary_core::di::{Container, Lifetime, ServiceScope};
use emissary_core::{
    BoxFuture, CancellationToken, ConfigurationError, DispatchError, DispatchResult, Message,
    MessageKind, TransportRole, TransportType,
};
use emissary_middleware::pipeline::terminal;
use emissary_middleware::{Middleware, MiddlewareContext, MiddlewareRegistry, PipelineBuilder, Terminal};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Double(i64);

impl Message for Double {
    type Response = i64;
    const KIND: MessageKind = MessageKind::Query;
}

/// Trail of middleware invocations shared through the scope.
#[derive(Default)]
struct Trail(Mutex<Vec<String>>);

impl Trail {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Retries the rest of the chain up to `Configuration` extra times.
#[derive(Default)]
struct Retry;

impl<M: Message> Middleware<M> for Retry {
    type Configuration = usize;

    fn execute(&self, ctx: MiddlewareContext<M, usize>) -> BoxFuture<'_, DispatchResult<M::Response>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match ctx.proceed().await {
                    Err(e) if attempt < *ctx.configuration() && !e.is_cancellation() => attempt += 1,
                    other => return other,
                }
            }
        })
    }
}

/// Answers with a fixed value and never reaches the handler.
#[derive(Default)]
struct Cached;

impl Middleware<Double> for Cached {
    type Configuration = i64;

    fn execute(&self, ctx: MiddlewareContext<Double, i64>) -> BoxFuture<'_, DispatchResult<i64>> {
        Box::pin(async move { Ok(*ctx.configuration()) })
    }
}

/// Adds `Configuration` to the message before continuing.
#[derive(Default)]
struct AddOffset;

impl Middleware<Double> for AddOffset {
    type Configuration = i64;

    fn execute(&self, ctx: MiddlewareContext<Double, i64>) -> BoxFuture<'_, DispatchResult<i64>> {
        Box::pin(async move {
            if let Some(trail) = ctx.scope().resolve::<Trail>() {
                trail.push(format!("offset:{}", ctx.configuration()));
            }
            let rewritten = Double(ctx.message().0 + ctx.configuration());
            ctx.next(rewritten, ctx.cancellation().clone()).await
        })
    }
}

/// Continues with an already cancelled token.
#[derive(Default)]
struct CancelDownstream;

impl<M: Message> Middleware<M> for CancelDownstream {
    type Configuration = ();

    fn execute(&self, ctx: MiddlewareContext<M, ()>) -> BoxFuture<'_, DispatchResult<M::Response>> {
        Box::pin(async move {
            let token = ctx.cancellation().child_token();
            token.cancel();
            ctx.next(ctx.message().clone(), token).await
        })
    }
}

/// Base of a small middleware family.
#[derive(Default)]
struct AuditBase;

impl Middleware<Double> for AuditBase {
    type Configuration = i64;

    fn execute(&self, ctx: MiddlewareContext<Double, i64>) -> BoxFuture<'_, DispatchResult<i64>> {
        Box::pin(async move {
            if let Some(trail) = ctx.scope().resolve::<Trail>() {
                trail.push(format!("base:{}", ctx.configuration()));
            }
            ctx.proceed().await
        })
    }
}

/// Derived from [`AuditBase`].
#[derive(Default)]
struct AuditSub;

impl Middleware<Double> for AuditSub {
    type Configuration = i64;

    fn execute(&self, ctx: MiddlewareContext<Double, i64>) -> BoxFuture<'_, DispatchResult<i64>> {
        Box::pin(async move {
            if let Some(trail) = ctx.scope().resolve::<Trail>() {
                trail.push(format!("sub:{}", ctx.configuration()));
            }
            ctx.proceed().await
        })
    }
}

/// Derived from [`AuditBase`] with an unrelated configuration type.
#[derive(Default)]
struct AuditLabel;

impl Middleware<Double> for AuditLabel {
    type Configuration = String;

    fn execute(&self, ctx: MiddlewareContext<Double, String>) -> BoxFuture<'_, DispatchResult<i64>> {
        Box::pin(async move { ctx.proceed().await })
    }
}

fn scope(trail: &Arc<Trail>) -> ServiceScope {
    let mut container = Container::new();
    container.register(Arc::clone(trail));
    container.register_default::<Retry>(Lifetime::Transient);
    container.register_default::<Cached>(Lifetime::Transient);
    container.register_default::<AddOffset>(Lifetime::Transient);
    container.register_default::<CancelDownstream>(Lifetime::Transient);
    container.register_default::<AuditBase>(Lifetime::Transient);
    container.register_default::<AuditSub>(Lifetime::Transient);
    container.register_default::<AuditLabel>(Lifetime::Transient);
    container.build().create_scope()
}

fn builder(trail: &Arc<Trail>) -> PipelineBuilder<Double> {
    let mut registry = MiddlewareRegistry::new();
    registry
        .register::<Retry>()
        .register::<Cached>()
        .register::<AddOffset>()
        .register::<CancelDownstream>()
        .register::<AuditBase>()
        .register_derived::<AuditSub, AuditBase>()
        .register_derived::<AuditLabel, AuditBase>();

    PipelineBuilder::new(
        Arc::new(registry),
        scope(trail),
        TransportType::in_process(TransportRole::Receiver),
    )
}

fn doubling() -> Terminal<Double> {
    terminal(|message: Double, _| async move { Ok(message.0 * 2) })
}

#[tokio::test]
async fn test_retry_reruns_rest_of_chain() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<Retry>(2)
        .unwrap()
        .use_middleware::<AddOffset>(1)
        .unwrap();
    let pipeline = builder.build();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let flaky = terminal(move |message: Double, _| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 2 {
                Err(DispatchError::msg("transient"))
            } else {
                Ok(message.0)
            }
        }
    });

    let response = pipeline
        .execute(Double(10), CancellationToken::new(), flaky)
        .await
        .unwrap();

    assert_eq!(response, 11);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(trail.entries(), vec!["offset:1"; 3]);
}

#[tokio::test]
async fn test_retry_gives_up_with_last_error() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder.use_middleware::<Retry>(1).unwrap();
    let pipeline = builder.build();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let failing = terminal(move |_: Double, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Err(DispatchError::msg("permanent")) }
    });

    let error = pipeline
        .execute(Double(1), CancellationToken::new(), failing)
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "permanent");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_short_circuit_skips_handler() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<Cached>(99)
        .unwrap()
        .use_middleware::<AddOffset>(1)
        .unwrap();
    let pipeline = builder.build();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = terminal(move |message: Double, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(message.0) }
    });

    let response = pipeline
        .execute(Double(5), CancellationToken::new(), handler)
        .await
        .unwrap();

    assert_eq!(response, 99);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(trail.entries().is_empty());
}

#[tokio::test]
async fn test_rewritten_message_reaches_handler() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<AddOffset>(3)
        .unwrap()
        .use_allow_multiple::<AddOffset>(4)
        .unwrap();
    let pipeline = builder.build();

    let response = pipeline
        .execute(Double(1), CancellationToken::new(), doubling())
        .await
        .unwrap();

    assert_eq!(response, 16);
    assert_eq!(trail.entries(), vec!["offset:3", "offset:4"]);
}

#[tokio::test]
async fn test_replaced_token_reaches_handler() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder.use_middleware::<CancelDownstream>(()).unwrap();
    let pipeline = builder.build();

    let observing = terminal(|_: Double, token: CancellationToken| async move {
        if token.is_cancelled() {
            Err(DispatchError::cancelled())
        } else {
            Ok(0)
        }
    });

    let outer = CancellationToken::new();
    let error = pipeline
        .execute(Double(1), outer.clone(), observing)
        .await
        .unwrap_err();

    assert!(error.is_cancellation());
    assert!(!outer.is_cancelled());
}

#[tokio::test]
async fn test_configure_base_updates_derived_entries() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<AuditBase>(1)
        .unwrap()
        .use_middleware::<AuditSub>(2)
        .unwrap()
        .configure::<AuditBase, _>(|value| *value *= 10)
        .unwrap();
    let pipeline = builder.build();

    pipeline
        .execute(Double(1), CancellationToken::new(), doubling())
        .await
        .unwrap();

    assert_eq!(trail.entries(), vec!["base:10", "sub:20"]);
}

#[test]
fn test_configure_sub_leaves_base_untouched() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<AuditBase>(1)
        .unwrap()
        .use_middleware::<AuditSub>(2)
        .unwrap()
        .configure::<AuditSub, _>(|value| *value += 1)
        .unwrap();

    let values: Vec<i64> = builder
        .iter()
        .filter_map(|entry| entry.configuration::<i64>().copied())
        .collect();
    assert_eq!(values, vec![1, 3]);
}

#[test]
fn test_configure_reports_mismatched_configuration() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder.use_middleware::<AuditLabel>("audit".to_string()).unwrap();

    let error = builder
        .configure::<AuditBase, _>(|value| *value += 1)
        .err()
        .unwrap();
    assert!(matches!(
        error,
        DispatchError::Configuration(ConfigurationError::ConfigurationTypeMismatch { .. })
    ));
}

#[test]
fn test_without_base_removes_derived_entries() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<AuditSub>(1)
        .unwrap()
        .use_middleware::<AddOffset>(0)
        .unwrap()
        .use_middleware::<AuditBase>(2)
        .unwrap();

    builder.without::<AuditBase>();

    let names: Vec<_> = builder.iter().map(|entry| entry.type_name()).collect();
    assert_eq!(names, vec![std::any::type_name::<AddOffset>()]);
}

#[test]
fn test_without_then_reuse_appends_once() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder
        .use_middleware::<AddOffset>(1)
        .unwrap()
        .use_middleware::<Retry>(0)
        .unwrap()
        .use_allow_multiple::<AddOffset>(2)
        .unwrap();

    builder.without::<AddOffset>();
    assert_eq!(builder.len(), 1);
    assert!(!builder.contains::<AddOffset>());

    builder.use_middleware::<AddOffset>(3).unwrap();
    let entries: Vec<_> = builder.iter().collect();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is::<Retry>());
    assert!(entries[1].is::<AddOffset>());
    assert_eq!(entries[1].configuration::<i64>(), Some(&3));
}

#[tokio::test]
async fn test_pipeline_shared_across_concurrent_calls() {
    let trail = Arc::new(Trail::default());
    let mut builder = builder(&trail);
    builder.use_middleware::<AddOffset>(1).unwrap();
    let pipeline = builder.build();

    let calls = (0..8).map(|value| {
        let pipeline = pipeline.clone();
        async move {
            pipeline
                .execute(Double(value), CancellationToken::new(), doubling())
                .await
        }
    });
    let results = spawn_all(calls).await;

    let responses: Vec<i64> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(responses, (0..8).map(|value| (value + 1) * 2).collect::<Vec<_>>());
    assert_eq!(trail.entries().len(), 8);
}

async fn spawn_all<F>(futures: impl Iterator<Item = F>) -> Vec<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut outputs = Vec::with_capacity(handles.len());
    for handle in handles {
        outputs.push(handle.await.unwrap());
    }
    outputs
}
