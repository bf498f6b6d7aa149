//! Cooperative cancellation shared by the orchestrator, retry loop and
//! scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable cancellation flag that async code can also wait on.
///
/// Cancellation is sticky: once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Returns a token cancelled when either `self` or `other` is.
    ///
    /// The returned token is independent: cancelling it does not cancel
    /// the parents.
    pub fn joined(&self, other: &CancelToken) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() || other.is_cancelled() {
            child.cancel();
            return child;
        }
        for parent in [self.clone(), other.clone()] {
            let child = child.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => child.cancel(),
                    _ = child.cancelled() => {}
                }
            });
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn joined_follows_either_parent() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let joined = a.joined(&b);
        assert!(!joined.is_cancelled());

        b.cancel();
        tokio::time::timeout(Duration::from_secs(1), joined.cancelled())
            .await
            .unwrap();
        assert!(!a.is_cancelled());
    }
}
