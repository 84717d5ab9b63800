//! Cancellation and deadline propagation for lock operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LockError, LockResult};

/// Carries cancellation and an optional deadline into lock operations.
///
/// A context is cheap to clone; clones share the same cancellation. Derived
/// contexts ([`Context::child`], [`Context::child_with_timeout`]) are done
/// when their parent is, but cancelling a child leaves the parent untouched.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = Context::with_timeout(Duration::from_secs(5));
/// let locker = coordinator.new_locker(&ctx, Key::new("doc-42")?)?;
/// locker.lock(&ctx).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never done unless cancelled explicitly.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Builds a context from an optional timeout, `None` meaning no deadline.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => Self::with_timeout(timeout),
            None => Self::background(),
        }
    }

    /// Derives a context that inherits this one's cancellation and deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a context whose deadline is the earlier of this context's and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True once cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `Err(LockError::Canceled)` if the context is done.
    pub fn check(&self) -> LockResult<()> {
        if self.is_done() {
            Err(LockError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Runs `fut` until it completes or the context is done.
    ///
    /// A context that is already done wins over a future that would complete
    /// immediately. On cancellation `fut` is dropped, which tears down
    /// whatever wait it was performing.
    pub async fn run<F>(&self, fut: F) -> LockResult<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.done() => Err(LockError::Canceled),
            output = fut => Ok(output),
        }
    }

    /// Sleeps for `duration` unless the context is done first.
    pub async fn sleep(&self, duration: Duration) -> LockResult<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_none());
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children_only() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_done());
        assert!(matches!(child.check(), Err(LockError::Canceled)));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_run() {
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(LockError::Canceled)));
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_done_context_beats_ready_future() {
        let ctx = Context::background();
        ctx.cancel();
        let result = ctx.run(async { 1 }).await;
        assert!(matches!(result, Err(LockError::Canceled)));
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert!(child.remaining().unwrap() <= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_sleep_cancelled() {
        let ctx = Context::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        assert!(matches!(handle.await.unwrap(), Err(LockError::Canceled)));
    }
}
