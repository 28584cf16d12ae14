//! One-shot scheduling for synchronizer follow-up ticks.
//!
//! The synchronizer never runs an unbounded pass; when a tick leaves
//! backlog behind it asks the scheduler to run one more tick "soon".
//! Duplicate requests while one is pending coalesce into a single wake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Fire-and-forget, at-least-once scheduling of a single logical job.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration);
}

/// Tokio-backed scheduler. A driver task awaits [`TokioScheduler::fired`]
/// and runs a tick per wake; `schedule_once` while a wake is pending is
/// a no-op.
pub struct TokioScheduler {
    pending: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Resolves when a scheduled wake fires.
    pub async fn fired(&self) {
        self.notify.notified().await;
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration) {
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.pending.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear before notifying so a request arriving during the
            // woken tick arms the next wake.
            pending.store(false, Ordering::SeqCst);
            notify.notify_one();
        });
    }
}
