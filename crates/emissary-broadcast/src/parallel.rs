//! All handlers at once.

use crate::{aggregate_failures, BroadcastRequest, BroadcastingStrategy, HandlerInvoker};
use async_trait::async_trait;
use emissary_core::{CancellationToken, DispatchError, DispatchResult};
use futures_util::future::join_all;
use std::num::NonZeroUsize;
use tokio::sync::Semaphore;

/// Runs handlers concurrently, optionally capped.
///
/// Every handler runs to completion; failures are collected and reported
/// through [`aggregate_failures`]. Handlers run on the publishing task, so
/// each sees its own fork of the publisher's dispatch context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelBroadcastingStrategy {
    max_degree_of_parallelism: Option<NonZeroUsize>,
}

impl ParallelBroadcastingStrategy {
    /// Creates a strategy without a concurrency cap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_degree_of_parallelism: None,
        }
    }

    /// Creates a strategy running at most `degree` handlers at a time.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `degree` is below one.
    ///
    /// # Example
    ///
    /// ```
    /// use emissary_broadcast::ParallelBroadcastingStrategy;
    ///
    /// assert!(ParallelBroadcastingStrategy::with_max_degree_of_parallelism(4).is_ok());
    /// assert!(ParallelBroadcastingStrategy::with_max_degree_of_parallelism(0).is_err());
    /// ```
    pub fn with_max_degree_of_parallelism(degree: i64) -> DispatchResult<Self> {
        let degree = usize::try_from(degree)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                DispatchError::invalid_argument(
                    "max_degree_of_parallelism",
                    format!("must be at least 1, got {degree}"),
                )
            })?;

        Ok(Self {
            max_degree_of_parallelism: Some(degree),
        })
    }

    /// The concurrency cap, if any.
    #[must_use]
    pub fn max_degree_of_parallelism(&self) -> Option<usize> {
        self.max_degree_of_parallelism.map(NonZeroUsize::get)
    }
}

#[async_trait]
impl BroadcastingStrategy for ParallelBroadcastingStrategy {
    async fn broadcast(
        &self,
        invokers: Vec<HandlerInvoker>,
        request: BroadcastRequest,
        cancellation: CancellationToken,
    ) -> DispatchResult<()> {
        tracing::debug!(
            message_type = request.message_type(),
            handler_count = invokers.len(),
            max_degree_of_parallelism = self.max_degree_of_parallelism(),
            "broadcasting in parallel"
        );

        let semaphore = self
            .max_degree_of_parallelism
            .map(|degree| Semaphore::new(degree.get().min(Semaphore::MAX_PERMITS)));
        let semaphore = semaphore.as_ref();

        let runs = invokers.iter().map(|invoker| {
            let token = cancellation.clone();
            async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                tracing::trace!(handler = invoker.handler_type(), "starting event handler");
                invoker.invoke(token).await
            }
        });

        let failures: Vec<DispatchError> = join_all(runs)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        aggregate_failures(failures)
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}
