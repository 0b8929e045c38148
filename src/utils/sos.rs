//! Signal-of-Stop: cooperative cancellation primitive.
//!
//! A thread-safe, async-aware cancellation token that can be cloned across
//! tasks, awaited for the cancellation notification, and used to race a
//! future against shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cooperative cancellation token.
///
/// Clones share the same underlying state, so cancelling any clone
/// notifies all waiters.
#[derive(Debug, Default)]
pub struct SignalOfStop {
    internal: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl SignalOfStop {
    /// Create a new, uncancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all waiters.
    ///
    /// After this call, `cancelled()` returns `true` and all pending
    /// `wait()` futures complete.
    pub fn cancel(&self) {
        self.internal.closing.store(true, Ordering::Release);
        self.internal.notify.notify_waiters();
    }

    /// Check if cancellation has been signaled.
    pub fn cancelled(&self) -> bool {
        self.internal.closing.load(Ordering::Acquire)
    }

    /// Wait for cancellation to be signaled.
    ///
    /// Returns immediately if already cancelled.
    pub async fn wait(&self) {
        while !self.cancelled() {
            self.internal.notify.notified().await;
        }
    }

    /// Race a future against cancellation.
    ///
    /// Returns `Ok(T)` if the future completes first, `Err(())` if
    /// cancellation is signaled first.
    pub async fn select<F, T>(&self, fut: F) -> Result<T, ()>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let clone = self.clone();
        tokio::select! {
            res = fut => Ok(res),
            _ = clone.wait() => Err(()),
        }
    }
}

impl Clone for SignalOfStop {
    fn clone(&self) -> Self {
        Self {
            internal: Arc::clone(&self.internal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let sos = SignalOfStop::new();
        assert!(!sos.cancelled());

        let waiter = sos.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        sos.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(sos.cancelled());
    }

    #[tokio::test]
    async fn test_select_prefers_completed_future() {
        let sos = SignalOfStop::new();
        assert_eq!(sos.select(async { 42 }).await, Ok(42));
    }

    #[tokio::test]
    async fn test_select_aborts_on_cancel() {
        let sos = SignalOfStop::new();
        sos.cancel();
        let res = sos
            .select(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(res, Err(()));
    }
}
