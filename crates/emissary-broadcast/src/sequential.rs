//! One handler at a time.

use crate::{aggregate_failures, BroadcastRequest, BroadcastingStrategy, HandlerInvoker};
use async_trait::async_trait;
use emissary_config::FailurePolicySetting;
use emissary_core::{CancellationToken, DispatchResult};

/// How [`SequentialBroadcastingStrategy`] reacts to a failing handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failure and return it.
    ///
    /// A cancellation error raised while the broadcast token is cancelled
    /// does not stop the run; it is collected and the remaining handlers
    /// still get to observe the token.
    #[default]
    FailFast,
    /// Run every handler, then report all failures together.
    FailAfterAll,
}

impl From<FailurePolicySetting> for FailurePolicy {
    fn from(setting: FailurePolicySetting) -> Self {
        match setting {
            FailurePolicySetting::ThrowOnFirstError => Self::FailFast,
            FailurePolicySetting::ThrowAfterAll => Self::FailAfterAll,
        }
    }
}

/// Runs handlers one after another, in registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBroadcastingStrategy {
    policy: FailurePolicy,
}

impl SequentialBroadcastingStrategy {
    /// Creates a strategy with `policy`.
    #[must_use]
    pub const fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    /// The failure policy.
    #[must_use]
    pub const fn policy(&self) -> FailurePolicy {
        self.policy
    }
}

#[async_trait]
impl BroadcastingStrategy for SequentialBroadcastingStrategy {
    async fn broadcast(
        &self,
        invokers: Vec<HandlerInvoker>,
        request: BroadcastRequest,
        cancellation: CancellationToken,
    ) -> DispatchResult<()> {
        tracing::debug!(
            message_type = request.message_type(),
            handler_count = invokers.len(),
            policy = ?self.policy,
            "broadcasting sequentially"
        );

        let mut failures = Vec::new();

        for invoker in &invokers {
            let Err(error) = invoker.invoke(cancellation.clone()).await else {
                continue;
            };

            tracing::trace!(
                message_type = request.message_type(),
                handler = invoker.handler_type(),
                error = %error,
                "event handler failed"
            );

            match self.policy {
                FailurePolicy::FailAfterAll => failures.push(error),
                FailurePolicy::FailFast if error.is_cancellation() && cancellation.is_cancelled() => {
                    failures.push(error);
                }
                FailurePolicy::FailFast => {
                    failures.push(error);
                    return aggregate_failures(failures);
                }
            }
        }

        aggregate_failures(failures)
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
