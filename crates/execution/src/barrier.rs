//! Reusable completion barrier for read passes over one spilled partition.
//!
//! Readers call [`PassBarrier::on_pass_start`] before the first chunk of a pass
//! and [`PassBarrier::on_pass_finish`] after the end-of-partition signal. Any
//! number of threads or tasks can wait for the passes in flight to drain
//! before the partition's storage is reclaimed.
//!
//! A waiter snapshots the barrier on entry and returns once as many passes
//! have finished as were outstanding at that moment. A pass that starts
//! after the waiter arrived does not hold it back.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use spillway_common::{Result, SpillwayError};
use tokio::sync::Notify;

#[derive(Debug, Default, Clone, Copy)]
struct PassCounts {
    outstanding: usize,
    /// Monotonic count of passes that reached their end.
    finished: u64,
}

impl PassCounts {
    fn drain_target(&self) -> u64 {
        self.finished + self.outstanding as u64
    }
}

#[derive(Debug, Default)]
struct BarrierInner {
    counts: Mutex<PassCounts>,
    cond: Condvar,
    notify: Notify,
}

/// Clonable handle; every clone observes the same counters.
#[derive(Debug, Clone, Default)]
pub struct PassBarrier {
    inner: Arc<BarrierInner>,
}

impl PassBarrier {
    /// Create a quiescent barrier (no outstanding passes).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a pass has started.
    pub fn on_pass_start(&self) {
        self.lock().outstanding += 1;
    }

    /// Record that a pass has reached its end and wake every waiter.
    ///
    /// Finishing with no outstanding pass is reported as
    /// [`SpillwayError::InvalidState`]; the counter never goes negative.
    pub fn on_pass_finish(&self) -> Result<()> {
        let mut counts = self.lock();
        if counts.outstanding == 0 {
            return Err(SpillwayError::InvalidState(
                "pass finished without a matching pass start".to_string(),
            ));
        }
        counts.outstanding -= 1;
        counts.finished += 1;
        drop(counts);
        self.wake();
        Ok(())
    }

    /// Passes started and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Passes finished since the barrier was created.
    pub fn finished(&self) -> u64 {
        self.lock().finished
    }

    /// Live handles onto this barrier.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Return to the quiescent state. Abandoned passes count as finished so
    /// current waiters are released.
    pub fn reset(&self) {
        let mut counts = self.lock();
        let abandoned = counts.outstanding;
        counts.outstanding = 0;
        counts.finished += abandoned as u64;
        drop(counts);
        if abandoned > 0 {
            self.wake();
        }
    }

    /// Block the calling thread until the passes outstanding on entry have finished.
    pub fn await_drained(&self) {
        let counts = self.lock();
        let target = counts.drain_target();
        let _counts = self
            .inner
            .cond
            .wait_while(counts, |c| c.finished < target)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`PassBarrier::await_drained`] but gives up after `timeout`.
    ///
    /// Returns whether the barrier drained.
    pub fn await_drained_timeout(&self, timeout: Duration) -> bool {
        let counts = self.lock();
        let target = counts.drain_target();
        let (counts, _) = self
            .inner
            .cond
            .wait_timeout_while(counts, timeout, |c| c.finished < target)
            .unwrap_or_else(PoisonError::into_inner);
        counts.finished >= target
    }

    /// Async counterpart of [`PassBarrier::await_drained`] for cooperative schedulers.
    pub async fn drained(&self) {
        let target = self.lock().drain_target();
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            let done = self.lock().finished >= target;
            if done {
                return;
            }
            notified.await;
        }
    }

    fn wake(&self) {
        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();
    }

    // Critical sections never panic, so a poisoned lock still holds consistent counts.
    fn lock(&self) -> MutexGuard<'_, PassCounts> {
        self.inner
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use spillway_common::SpillwayError;

    use super::PassBarrier;

    #[test]
    fn counts_start_and_finish() {
        let b = PassBarrier::new();
        assert_eq!(b.outstanding(), 0);
        b.on_pass_start();
        assert_eq!(b.outstanding(), 1);
        b.on_pass_finish().expect("finish");
        assert_eq!(b.outstanding(), 0);
        assert_eq!(b.finished(), 1);
    }

    #[test]
    fn finish_without_start_is_rejected() {
        let b = PassBarrier::new();
        let err = b.on_pass_finish().expect_err("underflow");
        assert!(matches!(err, SpillwayError::InvalidState(_)));
        assert_eq!(b.outstanding(), 0);
    }

    #[test]
    fn quiescent_barrier_does_not_block() {
        let b = PassBarrier::new();
        b.await_drained();
        assert!(b.await_drained_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn waiter_released_only_after_pass_finishes() {
        let b = PassBarrier::new();
        b.on_pass_start();
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let b = b.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                b.await_drained();
                released.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!released.load(Ordering::SeqCst));

        b.on_pass_finish().expect("finish");
        waiter.join().expect("waiter thread");
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn new_pass_after_finish_does_not_hold_back_earlier_waiter() {
        let b = PassBarrier::new();
        b.on_pass_start();
        let waiter = {
            let b = b.clone();
            thread::spawn(move || b.await_drained_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        b.on_pass_finish().expect("finish");
        b.on_pass_start();
        assert!(waiter.join().expect("waiter thread"));
        assert_eq!(b.outstanding(), 1);
    }

    #[test]
    fn timeout_reports_undrained() {
        let b = PassBarrier::new();
        b.on_pass_start();
        assert!(!b.await_drained_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn reset_releases_waiters() {
        let b = PassBarrier::new();
        b.on_pass_start();
        let waiter = {
            let b = b.clone();
            thread::spawn(move || b.await_drained_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        b.reset();
        assert!(waiter.join().expect("waiter thread"));
        assert_eq!(b.outstanding(), 0);
    }

    #[tokio::test]
    async fn async_waiter_resolves_after_finish() {
        let b = PassBarrier::new();
        b.on_pass_start();
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        b.on_pass_finish().expect("finish");
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("drained in time")
            .expect("join");
    }
}
