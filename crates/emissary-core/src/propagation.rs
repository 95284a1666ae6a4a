//! Ambient context propagation.
//!
//! The active [`DispatchContext`] is stored in a Tokio task-local slot. It
//! follows a logical call across `await` points and worker threads, and it
//! is only visible to futures polled inside [`scope`]. Spawned tasks do not
//! inherit it, so unrelated calls never observe each other's context.
//!
//! ```
//! use emissary_core::propagation::{self, Propagation};
//!
//! # tokio_test::block_on(async {
//! assert!(propagation::current().is_none());
//!
//! let trace = propagation::run(Propagation::Inherit, |ctx| async move {
//!     ctx.downstream_data().set("tenant", "acme");
//!     let nested = propagation::run(Propagation::Fork, |child| async move {
//!         child.downstream_data().get_text("tenant")
//!     })
//!     .await;
//!     assert_eq!(nested.as_deref(), Some("acme"));
//!     ctx.trace_id()
//! })
//! .await;
//!
//! assert!(!trace.is_empty());
//! assert!(propagation::current().is_none());
//! # });
//! ```

use crate::context::DispatchContext;
use std::future::Future;

tokio::task_local! {
    static CURRENT: DispatchContext;
}

/// How a call obtains its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Reuse the active context, or create one if there is none.
    #[default]
    Inherit,
    /// Run in a child of the active context, or in a new one if there is
    /// none. The child's upstream and bidirectional data are merged back
    /// into the parent when the call finishes, on success and on error.
    Fork,
}

/// Returns the active context, if any.
#[must_use]
pub fn current() -> Option<DispatchContext> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Runs `future` with `context` as the active context.
///
/// The previous context is restored when `future` completes or is dropped.
pub async fn scope<F: Future>(context: DispatchContext, future: F) -> F::Output {
    CURRENT.scope(context, future).await
}

/// Runs `f` with a context obtained according to `propagation`.
pub async fn run<F, Fut>(propagation: Propagation, f: F) -> Fut::Output
where
    F: FnOnce(DispatchContext) -> Fut,
    Fut: Future,
{
    let parent = current();

    match (propagation, parent) {
        (Propagation::Inherit, Some(active)) => f(active).await,
        (Propagation::Inherit, None) => {
            let context = DispatchContext::new();
            scope(context.clone(), f(context)).await
        }
        (Propagation::Fork, Some(parent)) => {
            let child = parent.fork();
            let output = scope(child.clone(), f(child.clone())).await;
            child.merge_into(&parent);
            output
        }
        (Propagation::Fork, None) => {
            let context = DispatchContext::new();
            scope(context.clone(), f(context)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_context_outside_scope() {
        assert!(current().is_none());
        let seen = scope(DispatchContext::new(), async { current().is_some() }).await;
        assert!(seen);
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_inherit_reuses_active_context() {
        let outer = DispatchContext::new();
        let reused = scope(outer.clone(), async {
            run(Propagation::Inherit, |ctx| async move { ctx }).await
        })
        .await;
        assert!(reused.ptr_eq(&outer));
    }

    #[tokio::test]
    async fn test_fork_isolates_downstream_and_merges_upstream() {
        let parent = DispatchContext::new();
        parent.downstream_data().set("down", "parent");

        scope(parent.clone(), async {
            run(Propagation::Fork, |child| async move {
                assert_eq!(child.downstream_data().get_text("down").as_deref(), Some("parent"));
                child.downstream_data().set("down", "child");
                child.upstream_data().set("up", "child");
                assert!(current().is_some_and(|c| c.ptr_eq(&child)));
            })
            .await;
        })
        .await;

        assert_eq!(parent.downstream_data().get_text("down").as_deref(), Some("parent"));
        assert_eq!(parent.upstream_data().get_text("up").as_deref(), Some("child"));
    }

    #[tokio::test]
    async fn test_fork_merges_on_error_path() {
        let parent = DispatchContext::new();
        let result: Result<(), &str> = scope(parent.clone(), async {
            run(Propagation::Fork, |child| async move {
                child.upstream_data().set("up", "before-failure");
                Err("failed")
            })
            .await
        })
        .await;

        assert!(result.is_err());
        assert!(parent.upstream_data().contains_key("up"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_context_survives_suspension() {
        let ctx = DispatchContext::new();
        let trace = ctx.trace_id();
        let observed = scope(ctx, async {
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current().map(|c| c.trace_id())
        })
        .await;
        assert_eq!(observed, Some(trace));
    }

    #[tokio::test]
    async fn test_spawned_tasks_do_not_inherit() {
        let handle = scope(DispatchContext::new(), async {
            tokio::spawn(async { current().is_some() })
        })
        .await;
        assert!(!handle.await.unwrap());
    }
}
