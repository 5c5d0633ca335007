//! Bounded worker pool for blocking work (body construction, chunked
//! reads/writes, crypto signing), off the event-loop thread.
//!
//! Realized with `tokio::task::spawn_blocking` gated by a counting
//! semaphore, so the configured worker count actually bounds concurrency
//! rather than relying on tokio's much larger default blocking-pool size
//! (SPEC_FULL.md §4.3, §5).

use std::sync::Arc;

use cloudhub_core::domain::CoreError;
use tokio::sync::Semaphore;

pub struct ThreadPool {
    semaphore: Arc<Semaphore>,
}

impl ThreadPool {
    pub fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs `f` on a blocking worker, awaiting a permit first so at most
    /// `workers` run at once.
    pub async fn schedule<F, R>(&self, f: F) -> Result<R, CoreError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::transport("thread pool closed"))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| CoreError::transport(format!("worker panicked: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schedule_runs_closure_and_returns_value() {
        let pool = ThreadPool::new(2);
        let result = pool.schedule(|| 1 + 1).await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn schedule_bounds_concurrency_to_worker_count() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pool = Arc::new(ThreadPool::new(1));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pool.schedule(move || {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
