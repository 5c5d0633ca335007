//! Single-threaded event loop with tag-paired, exactly-once completion.
//!
//! Each in-flight request reserves a [`Tag`] at submission. Two independent
//! signals race to observe a request's completion: the HTTP engine's
//! callback (`fulfill(tag, closure)`) and the request's own local bookkeeping
//! (`mark_local_done(tag)`). Whichever arrives second schedules `closure` for
//! the event loop to run; whichever arrives first just records its arrival.
//! This guarantees the completion closure runs exactly once, after both
//! signals are observed, matching SPEC_FULL.md §4.3.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Opaque handle reserved per in-flight request for tag-pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u64);

type Job = Box<dyn FnOnce() + Send>;

enum Slot {
    HttpArrived(Job),
    LocalArrived,
}

/// A non-blocking, caller-pumped queue of completion work.
pub struct EventLoop {
    queue: Mutex<VecDeque<Job>>,
    pending: Mutex<HashMap<u64, Slot>>,
    next_tag: AtomicU64,
    quit: AtomicBool,
    notify: Notify,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            quit: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Reserves a tag for a new in-flight request.
    pub fn reserve_tag(&self) -> Tag {
        Tag(self.next_tag.fetch_add(1, Ordering::Relaxed))
    }

    /// Schedules `task` to run on the event loop, independent of tag-pairing.
    pub fn invoke(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.lock().unwrap().push_back(Box::new(task));
        self.notify.notify_one();
    }

    /// Called from the HTTP callback with the request's completion work.
    ///
    /// If the local side already signalled completion for `tag`, schedules
    /// `closure` (and clears the pairing slot) immediately; otherwise stores
    /// `closure` to run once the local side catches up.
    pub fn fulfill(&self, tag: Tag, closure: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(closure);
        let ready_job = {
            let mut pending = self.pending.lock().unwrap();
            match pending.remove(&tag.0) {
                Some(Slot::LocalArrived) => Some(job),
                Some(Slot::HttpArrived(_)) | None => {
                    pending.insert(tag.0, Slot::HttpArrived(job));
                    None
                }
            }
        };
        if let Some(job) = ready_job {
            self.invoke_boxed(job);
        }
    }

    /// Called from the request's own bookkeeping once it has locally
    /// observed completion (e.g. the thread-pool result landed).
    pub fn mark_local_done(&self, tag: Tag) {
        let job = {
            let mut pending = self.pending.lock().unwrap();
            match pending.remove(&tag.0) {
                Some(Slot::HttpArrived(job)) => Some(job),
                Some(Slot::LocalArrived) | None => {
                    pending.insert(tag.0, Slot::LocalArrived);
                    None
                }
            }
        };
        if let Some(job) = job {
            self.invoke_boxed(job);
        }
    }

    fn invoke_boxed(&self, job: Job) {
        self.queue.lock().unwrap().push_back(job);
        self.notify.notify_one();
    }

    /// Drains and runs everything currently queued, without blocking.
    /// Returns the number of jobs run.
    pub fn process_events(&self) -> usize {
        let jobs: Vec<Job> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }

    /// Blocks (asynchronously) until [`Self::quit`] is called, pumping
    /// events as they arrive.
    pub async fn run(&self) {
        while !self.quit.load(Ordering::Acquire) {
            self.process_events();
            if self.quit.load(Ordering::Acquire) {
                break;
            }
            self.notify.notified().await;
        }
        self.process_events();
    }

    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fulfill_before_local_done_waits_for_pairing() {
        let loop_ = EventLoop::new();
        let tag = loop_.reserve_tag();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        loop_.fulfill(tag, move || ran_clone.store(true, Ordering::SeqCst));
        assert_eq!(loop_.process_events(), 0);
        assert!(!ran.load(Ordering::SeqCst));

        loop_.mark_local_done(tag);
        assert_eq!(loop_.process_events(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn local_done_before_fulfill_also_pairs() {
        let loop_ = EventLoop::new();
        let tag = loop_.reserve_tag();
        loop_.mark_local_done(tag);

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        loop_.fulfill(tag, move || ran_clone.store(true, Ordering::SeqCst));
        assert_eq!(loop_.process_events(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn invoke_runs_independent_of_pairing() {
        let loop_ = EventLoop::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        loop_.invoke(move || ran_clone.store(true, Ordering::SeqCst));
        assert_eq!(loop_.process_events(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }
}
