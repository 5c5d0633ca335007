//! `Promise<T>`: a single-value, single-producer, multi-consumer handle.
//!
//! `fulfill`/`reject` are first-writer-wins; `then`/`recover` register
//! continuations that run synchronously on the registering thread if the
//! promise is already settled, or are stored and run on whichever thread
//! calls `complete` otherwise. `Promise<T>` also implements `Future`, so
//! `.await` composes the same chain `then` would build (SPEC_FULL.md §4.3).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use cloudhub_core::domain::{CoreError, ErrorKind};

type Settled<T> = Result<T, CoreError>;
type Continuation<T> = Box<dyn FnOnce(Settled<T>) + Send>;

struct Inner<T> {
    result: Option<Settled<T>>,
    continuations: Vec<Continuation<T>>,
    wakers: Vec<Waker>,
    cancel_hook: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            result: None,
            continuations: Vec::new(),
            wakers: Vec::new(),
            cancel_hook: None,
        }
    }
}

/// The producer half: whoever started the underlying work holds this and
/// calls `fulfill`/`reject` exactly once (subsequent calls are ignored).
pub struct Completer<T: Clone + Send + 'static> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Clone + Send + 'static> Completer<T> {
    pub fn fulfill(&self, value: T) {
        self.complete(Ok(value));
    }

    pub fn reject(&self, err: CoreError) {
        self.complete(Err(err));
    }

    pub fn complete(&self, result: Settled<T>) {
        let (continuations, wakers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.result.is_some() {
                return;
            }
            inner.result = Some(result.clone());
            (
                std::mem::take(&mut inner.continuations),
                std::mem::take(&mut inner.wakers),
            )
        };
        for continuation in continuations {
            continuation(result.clone());
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// Registers the closure run when [`Promise::cancel`] is called on this
    /// chain's root before completion. Replaces any previously set hook.
    pub fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.lock().unwrap().cancel_hook = Some(Box::new(hook));
    }
}

impl<T: Clone + Send + 'static> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The consumer half, freely cloneable: every clone observes the same
/// eventual value or error.
pub struct Promise<T: Clone + Send + 'static> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Clone + Send + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates an unsettled promise and the [`Completer`] that settles it.
    pub fn new() -> (Completer<T>, Self) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            Completer {
                inner: inner.clone(),
            },
            Self { inner },
        )
    }

    pub fn resolved(value: T) -> Self {
        let (completer, promise) = Self::new();
        completer.fulfill(value);
        promise
    }

    pub fn failed(err: CoreError) -> Self {
        let (completer, promise) = Self::new();
        completer.reject(err);
        promise
    }

    fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Settled<T>) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Some(result) = inner.result.clone() {
            drop(inner);
            f(result);
        } else {
            inner.continuations.push(Box::new(f));
        }
    }

    /// Chains a continuation that returns either a value or another promise;
    /// in both cases the returned promise settles with the eventual result
    /// (tuple-returning closures flatten through [`PromiseOrValue::Promise`]).
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> PromiseOrValue<U> + Send + 'static,
    {
        let (completer, promise) = Promise::new();
        self.on_complete(move |result| match result {
            Ok(value) => match f(value) {
                PromiseOrValue::Value(v) => completer.fulfill(v),
                PromiseOrValue::Promise(p) => {
                    p.on_complete(move |inner_result| completer.complete(inner_result));
                }
            },
            Err(e) => completer.reject(e),
        });
        promise
    }

    /// Maps a successful value, passing errors through unchanged.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |v| PromiseOrValue::Value(f(v)))
    }

    /// Kind-scoped recovery: if the rejection's kind matches `kind`, `f`
    /// produces a replacement value; any other kind (or success) passes
    /// through unchanged.
    pub fn recover<F>(&self, kind: ErrorKind, f: F) -> Promise<T>
    where
        F: FnOnce(CoreError) -> T + Send + 'static,
    {
        let (completer, promise) = Promise::new();
        self.on_complete(move |result| match result {
            Ok(v) => completer.fulfill(v),
            Err(e) if e.is_kind(kind) => completer.fulfill(f(e)),
            Err(e) => completer.reject(e),
        });
        promise
    }

    /// Propagates cancellation to the root's cancel hook, if one is set and
    /// the chain has not already settled. The hook runs at most once.
    pub fn cancel(&self) {
        let hook = {
            let mut inner = self.inner.lock().unwrap();
            if inner.result.is_some() {
                None
            } else {
                inner.cancel_hook.take()
            }
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().unwrap().result.is_some()
    }
}

/// Return type of a `then` continuation: either a plain value or another
/// promise to flatten into the chain.
pub enum PromiseOrValue<U: Clone + Send + 'static> {
    Value(U),
    Promise(Promise<U>),
}

impl<U: Clone + Send + 'static> From<U> for PromiseOrValue<U> {
    fn from(value: U) -> Self {
        PromiseOrValue::Value(value)
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Settled<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(result) = &inner.result {
            Poll::Ready(result.clone())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn then_runs_synchronously_on_already_settled_promise() {
        let promise = Promise::resolved(40);
        let doubled = promise.map(|v| v * 2);
        assert_eq!(doubled.is_settled(), true);
    }

    #[test]
    fn first_writer_wins() {
        let (completer, promise) = Promise::<i32>::new();
        completer.fulfill(1);
        completer.fulfill(2);
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        promise.on_complete(move |r| *seen_clone.lock().unwrap() = r.ok());
        assert_eq!(*seen.lock().unwrap(), Some(1));
    }

    #[test]
    fn error_passes_through_recover_of_different_kind() {
        let promise = Promise::<i32>::failed(CoreError::not_found("missing"));
        let recovered = promise.recover(ErrorKind::Auth, |_| 0);
        assert!(recovered.is_settled());
    }

    #[tokio::test]
    async fn await_resolves_like_then() {
        let (completer, promise) = Promise::<i32>::new();
        tokio::spawn(async move {
            completer.fulfill(7);
        });
        let value = promise.await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancel_invokes_hook_exactly_once() {
        let (completer, promise) = Promise::<i32>::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        completer.set_cancel_hook(move || {
            *calls_clone.lock().unwrap() += 1;
        });
        promise.cancel();
        promise.cancel();
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
