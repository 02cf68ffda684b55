use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

// -----------------------------------------------------------------------------
// ----- WaitGroup -------------------------------------------------------------

/// Counter of outstanding work with a "wait until zero" primitive.
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: AtomicUsize,
    zero: Notify,
}

// -----------------------------------------------------------------------------
// ----- WaitGroup: Public -----------------------------------------------------

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "WaitGroup::done called more often than add");
        if prev == 1 {
            self.zero.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Increment and hand back a guard that decrements exactly once on drop.
    pub fn enter(self: &Arc<Self>) -> InFlight {
        self.add();
        InFlight {
            group: Some(self.clone()),
        }
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            // Register before reading the counter so a concurrent `done`
            // cannot slip between the check and the await.
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Returns false if the counter did not reach zero within `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

// -----------------------------------------------------------------------------
// ----- InFlight --------------------------------------------------------------

#[derive(Debug)]
pub struct InFlight {
    group: Option<Arc<WaitGroup>>,
}

impl InFlight {
    /// Take over a unit that was already added with `WaitGroup::add`.
    pub fn adopt(group: &Arc<WaitGroup>) -> Self {
        Self {
            group: Some(group.clone()),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            group.done();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
