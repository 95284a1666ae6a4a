//! Cancellation helpers.
//!
//! A single [`CancellationToken`] flows from the top-level call downward.
//! The framework never aborts a dispatch because a token is cancelled;
//! handlers observe cancellation themselves, typically through these helpers.

use crate::error::{DispatchError, DispatchResult};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Fails with a cancellation error if `token` is cancelled.
///
/// # Example
///
/// ```
/// use emissary_core::cancellation::ensure_not_cancelled;
/// use emissary_core::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(ensure_not_cancelled(&token).is_ok());
/// token.cancel();
/// assert!(ensure_not_cancelled(&token).unwrap_err().is_cancellation());
/// ```
pub fn ensure_not_cancelled(token: &CancellationToken) -> DispatchResult<()> {
    if token.is_cancelled() {
        Err(DispatchError::cancelled())
    } else {
        Ok(())
    }
}

/// Runs `future` until it completes or `token` is cancelled.
///
/// Cancellation wins if both are ready.
pub async fn cancellable<F, T>(token: &CancellationToken, future: F) -> DispatchResult<T>
where
    F: Future<Output = DispatchResult<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(DispatchError::cancelled()),
        result = future => result,
    }
}

/// Returns a child token that is also cancelled after `timeout`.
///
/// The timer task holds only the child token and ends with the timeout.
#[must_use]
pub fn with_timeout(token: &CancellationToken, timeout: std::time::Duration) -> CancellationToken {
    let child = token.child_token();
    let timer = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = timer.cancelled() => {}
            () = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_completes() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancellable_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result: DispatchResult<()> = cancellable(&token, std::future::pending()).await;
        assert!(result.unwrap_err().is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_cancels_child_only() {
        let parent = CancellationToken::new();
        let child = with_timeout(&parent, Duration::from_millis(50));
        assert!(!child.is_cancelled());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
