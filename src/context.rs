//! Caller-side cancellation and deadlines for blocking operations.

use crate::error::ContextError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline handed to every blocking call.
///
/// Cloning shares the token; `child()` derives a context that is cancelled
/// with its parent but can also be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl WaitContext {
    /// A context that only ends when explicitly cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A timeout too large to represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context sharing this one's cancellation, optionally tightening the deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.and_then(|t| Instant::now().checked_add(t));
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Some` once the context has ended; cancellation is reported before the deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context ends.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        tokio::select! {
            err = self.done() => Err(err),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_and_cancel_are_reported() {
        let ctx = WaitContext::with_timeout(Duration::from_millis(100));
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        let parent = WaitContext::new();
        let child = parent.child(None);
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert_eq!(child.sleep(Duration::from_secs(60)).await, Err(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeouts_mean_no_deadline() {
        let ctx = WaitContext::with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.sleep(Duration::from_secs(3600)).await, Ok(()));

        let bounded = WaitContext::with_timeout(Duration::from_secs(5));
        let child = bounded.child(Some(Duration::MAX));
        assert_eq!(child.deadline(), bounded.deadline());
        assert_eq!(WaitContext::new().child(Some(Duration::MAX)).deadline(), None);
    }
}
