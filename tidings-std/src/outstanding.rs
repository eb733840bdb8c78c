//! Outstanding-work tracking.
//!
//! Every fire-and-forget unit a router schedules is spawned through a
//! [`TaskTracker`] and raced against a [`CancellationToken`], so callers can
//! wait for the set to drain (`join`) or cancel it (`close`). `close` swaps
//! in a fresh token, which keeps the set usable afterwards.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub(crate) struct Outstanding {
    // Kept closed, so `wait` resolves whenever the set is empty.
    tracker: TaskTracker,
    token: Mutex<CancellationToken>,
}

impl Outstanding {
    pub(crate) fn new() -> Arc<Self> {
        let tracker = TaskTracker::new();
        tracker.close();
        Arc::new(Self {
            tracker,
            token: Mutex::new(CancellationToken::new()),
        })
    }

    fn token(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `unit` on `handle` and track it until it completes or is cancelled.
    pub(crate) fn spawn<F>(&self, handle: &Handle, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token().clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = unit => {}
                }
            },
            handle,
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.tracker.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Cancel every tracked unit. Returns how many were tracked.
    ///
    /// Cancelled units leave the set the next time their runtime polls them,
    /// or when that runtime shuts down.
    pub(crate) fn cancel_all(&self) -> usize {
        let count = self.tracker.len();
        let cancelled = std::mem::replace(&mut *self.token(), CancellationToken::new());
        cancelled.cancel();
        count
    }

    /// Suspend until the set drains or `timeout` passes. Returns true if drained.
    pub(crate) async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }

    /// Block until the set drains or `timeout` passes, driving the wait on
    /// `handle`. Returns true if drained.
    ///
    /// `handle` must belong to a runtime driven by another thread.
    pub(crate) fn wait_blocking(&self, handle: &Handle, timeout: Duration) -> bool {
        if self.is_empty() {
            return true;
        }
        let wait = || handle.block_on(self.wait(timeout));
        if Handle::try_current().is_err() {
            return wait();
        }
        // `Handle::block_on` refuses to run inside a runtime context.
        thread::scope(|scope| scope.spawn(wait).join().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BackgroundLoop;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Built lazily so the timer belongs to whichever runtime polls it.
    async fn stall() {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    async fn brief() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_observes_completion() {
        let set = Outstanding::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let hits = Arc::clone(&hits);
            set.spawn(&Handle::current(), async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(set.wait(Duration::from_secs(5)).await);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_drains_set() {
        let set = Outstanding::new();
        set.spawn(&Handle::current(), stall());
        assert_eq!(set.len(), 1);
        assert_eq!(set.cancel_all(), 1);
        assert!(set.wait(Duration::from_secs(1)).await);
        assert!(set.is_empty());
        assert_eq!(set.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_units_after_cancel_run_normally() {
        let set = Outstanding::new();
        set.cancel_all();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        set.spawn(&Handle::current(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(set.wait(Duration::from_secs(1)).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let set = Outstanding::new();
        set.spawn(&Handle::current(), stall());
        assert!(!set.wait(Duration::from_millis(20)).await);
        set.cancel_all();
    }

    #[test]
    fn test_wait_blocking_through_loop() {
        let bridge = BackgroundLoop::new("tidings-outstanding-test".into(), Duration::from_secs(5));
        let handle = bridge.handle().unwrap();
        let set = Outstanding::new();
        set.spawn(&handle, brief());
        assert!(set.wait_blocking(&handle, Duration::from_secs(5)));

        set.spawn(&handle, stall());
        assert!(!set.wait_blocking(&handle, Duration::from_millis(20)));
        set.cancel_all();
        assert!(set.wait_blocking(&handle, Duration::from_secs(5)));
        bridge.stop();
    }

    #[tokio::test]
    async fn test_wait_blocking_inside_runtime() {
        let bridge = BackgroundLoop::new("tidings-outstanding-test".into(), Duration::from_secs(5));
        let handle = bridge.handle().unwrap();
        let set = Outstanding::new();
        set.spawn(&handle, brief());
        assert!(set.wait_blocking(&handle, Duration::from_secs(5)));
        bridge.stop();
    }
}
