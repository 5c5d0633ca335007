//! Cancellation pool and token chaining.
//!
//! A dedicated worker drains a cancel queue so a request's `cancel()` work
//! (which may itself block briefly, e.g. waiting on a socket shutdown) never
//! stalls the event loop (SPEC_FULL.md §4.3).

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type CancelJob = Box<dyn FnOnce() + Send>;

pub struct CancelPool {
    tx: mpsc::UnboundedSender<CancelJob>,
}

impl CancelPool {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CancelJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::task::spawn_blocking(job);
            }
        });
        Self { tx }
    }

    /// Moves `job` (a request's `cancel()` body) onto the dedicated worker.
    pub fn cancel(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(job));
    }
}

impl Default for CancelPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a parent cancellation token and a child chained from it, so
/// cancelling the parent also cancels the child — the "cancel propagates to
/// the root" behavior of SPEC_FULL.md §4.3 realized via `tokio_util`.
pub fn child_token(parent: &CancellationToken) -> CancellationToken {
    parent.child_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cancel_pool_runs_job_on_dedicated_worker() {
        let pool = CancelPool::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        pool.cancel(move || ran_clone.store(true, Ordering::SeqCst));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelling_parent_token_cancels_child() {
        let parent = CancellationToken::new();
        let child = child_token(&parent);
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
