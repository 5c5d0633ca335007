//! Asynchronous request runtime: futures, event loop, thread pool, and
//! cancellation (SPEC_FULL.md §4.3, §5).
//!
//! [`Promise<T>`] is the composable single-value future every provider
//! operation resolves with; it also implements [`std::future::Future`] so
//! ordinary `.await` composes the same chain `then`/`recover` would build.
//! [`EventLoop`] serializes completions onto a single thread via tag-paired
//! `fulfill`/`mark_local_done`. [`ThreadPool`] runs blocking work off that
//! thread. [`CancelPool`] and [`child_token`] implement the cancellation
//! half: a dedicated worker for blocking cancel bodies, and
//! `tokio_util::sync::CancellationToken` chaining for "cancel propagates to
//! the root".

mod cancel;
mod event_loop;
mod promise;
mod thread_pool;

pub use cancel::{child_token, CancelPool};
pub use event_loop::{EventLoop, Tag};
pub use promise::{Completer, Promise, PromiseOrValue};
pub use thread_pool::ThreadPool;
