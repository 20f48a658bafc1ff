//! Cancellation signal shared between threads and async tasks

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One-shot cancellation flag, cloneable across threads and tasks.
///
/// The scheduler thread polls `cancelled()` each tick; async consumers
/// await `wait_cancellation()` in a select.
#[derive(Debug, Clone)]
pub struct SignalOfStop {
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::Relaxed);
        self.shared.notify.notify_waiters();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Relaxed)
    }

    /// Wait until the signal is cancelled.
    ///
    /// The waiter is registered with `Notified::enable` before the flag
    /// is re-checked: `notify_waiters` only wakes already-registered
    /// waiters, so checking first would lose a cancel that lands between
    /// the check and the registration.
    pub async fn wait_cancellation(&self) {
        while !self.cancelled() {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_visible_to_clones() {
        let sos = SignalOfStop::new();
        let clone = sos.clone();
        assert!(!clone.cancelled());
        sos.cancel();
        assert!(clone.cancelled());
    }

    #[tokio::test]
    async fn test_wait_cancellation() {
        let sos = SignalOfStop::new();
        let waiter = sos.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_cancellation().await;
            true
        });
        sos.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_after_cancel_returns_immediately() {
        let sos = SignalOfStop::new();
        sos.cancel();
        // The one-shot notification already fired; the flag alone must
        // satisfy a waiter that arrives late
        sos.wait_cancellation().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_from_foreign_thread_wakes_waiter() {
        // Cancel races the waiter's registration from a plain OS thread;
        // the waiter must wake no matter which side wins
        for _ in 0..100 {
            let sos = SignalOfStop::new();
            let waiter = sos.clone();
            let handle = tokio::spawn(async move {
                waiter.wait_cancellation().await;
            });
            let canceller = std::thread::spawn(move || sos.cancel());
            canceller.join().unwrap();
            tokio::time::timeout(std::time::Duration::from_secs(1), handle)
                .await
                .expect("waiter never woke")
                .unwrap();
        }
    }
}
