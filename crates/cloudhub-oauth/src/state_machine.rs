//! The per-provider authorization state machine (SPEC_FULL.md §4.4).
//!
//! `Auth` owns the current token and arbitrates refreshes: at most one
//! refresh is in flight per provider at a time, realized with a mutex-guarded
//! "current auth" slot — an empty slot means a caller may claim it and start
//! refreshing, a non-empty slot means a caller attaches to the in-flight
//! [`cloudhub_runtime::Promise`] instead of starting a second one.

use std::sync::{Arc, RwLock};

use cloudhub_core::domain::{CoreError, ErrorKind, Token};
use cloudhub_core::ports::AuthCallback;
use cloudhub_runtime::Promise;
use tokio::sync::Mutex;

/// What a reauthorization attempt needs to do its work.
#[async_trait::async_trait]
pub trait Refresher: Send + Sync {
    /// Exchanges the current refresh token for a fresh access token.
    async fn refresh(&self, current: &Token) -> Result<Token, CoreError>;
}

/// The state machine's externally visible phase, mirrored for diagnostics
/// and for the CLI's `auth` subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Reauthorizing,
    AuthorizationRequired,
}

struct Inner {
    token: Token,
    state: AuthState,
    in_flight: Option<Promise<Token>>,
}

/// Per-provider authorization handle.
///
/// Call [`Auth::authorized_token`] before every outbound request; on a
/// reauth-eligible failure (HTTP 401, and provider-specific others) call
/// [`Auth::reauthorize`] and retry the original request exactly once per
/// SPEC_FULL.md §4.4 step 5.
pub struct Auth {
    inner: Mutex<Inner>,
    refresher: Arc<dyn Refresher>,
    /// Mirrors `inner.token`, updated under the same critical sections, so
    /// [`Self::token_snapshot`] can read it without an `.await` — the
    /// `CloudProvider::token` port method is a cheap synchronous accessor.
    snapshot: RwLock<Token>,
    /// The factory's dead-account side channel (SPEC_FULL.md §6-7), notified
    /// when a reauth attempt lands in [`AuthState::AuthorizationRequired`].
    callback: Option<Arc<dyn AuthCallback>>,
}

impl Auth {
    pub fn new(token: Token, refresher: Arc<dyn Refresher>) -> Self {
        Self::with_callback(token, refresher, None)
    }

    pub fn with_callback(
        token: Token,
        refresher: Arc<dyn Refresher>,
        callback: Option<Arc<dyn AuthCallback>>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(token.clone()),
            inner: Mutex::new(Inner {
                token,
                state: AuthState::Idle,
                in_flight: None,
            }),
            refresher,
            callback,
        }
    }

    pub async fn current_token(&self) -> Token {
        self.inner.lock().await.token.clone()
    }

    /// Synchronous snapshot of the current token, for contexts that can't
    /// `.await` (the `CloudProvider::token` port method).
    pub fn token_snapshot(&self) -> Token {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn state(&self) -> AuthState {
        self.inner.lock().await.state
    }

    /// Runs the reauthorization protocol: exactly one in-flight refresh per
    /// provider; concurrent callers attach to it rather than launching their
    /// own (SPEC_FULL.md §4.4 steps 3-6).
    pub async fn reauthorize(&self) -> Result<Token, CoreError> {
        let (promise, is_owner) = {
            let mut inner = self.inner.lock().await;
            if let Some(existing) = &inner.in_flight {
                (existing.clone(), false)
            } else {
                inner.state = AuthState::Reauthorizing;
                let (completer, promise) = Promise::new();
                inner.in_flight = Some(promise.clone());
                let current = inner.token.clone();
                let refresher = self.refresher.clone();
                tokio::spawn(async move {
                    completer.complete(refresher.refresh(&current).await);
                });
                (promise, true)
            }
        };

        let result = promise.await;

        if is_owner {
            let mut inner = self.inner.lock().await;
            inner.in_flight = None;
            match &result {
                Ok(token) => {
                    inner.token = token.clone();
                    inner.state = AuthState::Idle;
                    *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = token.clone();
                }
                Err(e) if e.is_kind(ErrorKind::Auth) => {
                    inner.state = AuthState::AuthorizationRequired;
                    if let Some(callback) = &self.callback {
                        callback.done(Err(e.clone()));
                    }
                }
                Err(_) => {
                    inner.state = AuthState::Idle;
                }
            }
        }

        result
    }

    /// Records a fresh token obtained out-of-band (initial login, or a code
    /// exchange following [`AuthState::AuthorizationRequired`]), returning
    /// the state machine to [`AuthState::Idle`].
    pub async fn set_token(&self, token: Token) {
        let mut inner = self.inner.lock().await;
        let was_authorization_required = inner.state == AuthState::AuthorizationRequired;
        inner.token = token.clone();
        inner.state = AuthState::Idle;
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = token;
        if was_authorization_required {
            if let Some(callback) = &self.callback {
                callback.done(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Refresher for CountingRefresher {
        async fn refresh(&self, _current: &Token) -> Result<Token, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CoreError::auth("refresh rejected"))
            } else {
                Ok(Token::new("refresh", "new-access-token", 3600))
            }
        }
    }

    #[tokio::test]
    async fn concurrent_reauthorize_calls_share_one_refresh() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let auth = Arc::new(Auth::new(
            Token::new("refresh", "stale", 0),
            refresher.clone(),
        ));

        let a = auth.clone();
        let b = auth.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { a.reauthorize().await }),
            tokio::spawn(async move { b.reauthorize().await }),
        );
        assert!(r1.unwrap().is_ok());
        assert!(r2.unwrap().is_ok());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.state().await, AuthState::Idle);
        assert_eq!(auth.current_token().await.access_token, "new-access-token");
    }

    #[tokio::test]
    async fn auth_failure_transitions_to_authorization_required() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let auth = Auth::new(Token::new("refresh", "stale", 0), refresher);
        let result = auth.reauthorize().await;
        assert!(result.is_err());
        assert_eq!(auth.state().await, AuthState::AuthorizationRequired);
    }

    struct RecordingCallback {
        calls: std::sync::Mutex<Vec<bool>>,
    }

    impl AuthCallback for RecordingCallback {
        fn done(&self, result: Result<(), CoreError>) {
            self.calls.lock().unwrap().push(result.is_ok());
        }
    }

    #[tokio::test]
    async fn auth_failure_notifies_callback_and_success_clears_it() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let callback = Arc::new(RecordingCallback {
            calls: std::sync::Mutex::new(Vec::new()),
        });
        let auth = Auth::with_callback(
            Token::new("refresh", "stale", 0),
            refresher,
            Some(callback.clone()),
        );

        auth.reauthorize().await.unwrap_err();
        assert_eq!(*callback.calls.lock().unwrap(), vec![false]);

        auth.set_token(Token::new("refresh", "fresh", 3600)).await;
        assert_eq!(*callback.calls.lock().unwrap(), vec![false, true]);
        assert_eq!(auth.state().await, AuthState::Idle);
    }
}
