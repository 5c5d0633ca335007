//! Shared request plumbing every provider adapter builds on.
//!
//! Generalizes the reference adapter's `GraphClient::request`/
//! `execute_with_retry` (bearer-auth request building plus a 429/401 retry
//! loop) into the provider-agnostic "generic request template" of
//! SPEC_FULL.md §4.5: build request -> apply auth -> send -> on a
//! reauth-eligible status, refresh once and retry; otherwise surface the
//! error. Bearer-token OAuth2 providers go through [`authorized_request`];
//! Basic-auth (WebDAV) and signed (S3) providers call [`execute`] directly
//! and apply their own per-request auth.

use std::sync::{Arc, Mutex};

use cloudhub_core::domain::{CoreError, Hints, Permission, Token};
use cloudhub_core::ports::AuthCallback;
use cloudhub_http::{Callback, HttpEngine, HttpError, HttpMethod};
use cloudhub_oauth::Auth;
use cloudhub_runtime::ThreadPool;

/// What a provider adapter receives at construction time
/// (SPEC_FULL.md §6 `InitData`).
pub struct InitData {
    pub token: Token,
    pub hints: Hints,
    pub permission: Permission,
    /// Dead-account side channel (SPEC_FULL.md §6-7): `None` for callers
    /// (tests, one-shot CLI invocations) that don't track account lifetime.
    pub callback: Option<Arc<dyn AuthCallback>>,
    pub http: Arc<dyn HttpEngine>,
    pub thread_pool: Arc<ThreadPool>,
}

/// The pieces every adapter needs once constructed: the token/reauth state
/// machine, the hints it was built with, its permission, a shared HTTP
/// engine handle, and the thread pool blocking work (local filesystem I/O,
/// crypto signing) is dispatched to.
pub struct ProviderContext {
    pub auth: Arc<Auth>,
    pub hints: Hints,
    pub permission: Permission,
    pub http: Arc<dyn HttpEngine>,
    pub thread_pool: Arc<ThreadPool>,
}

impl ProviderContext {
    pub fn new(init: InitData, auth: Arc<Auth>) -> Self {
        Self {
            auth,
            hints: init.hints,
            permission: init.permission,
            http: init.http,
            thread_pool: init.thread_pool,
        }
    }
}

/// Status and body of a completed request, body buffered in full.
///
/// Streaming download/upload paths don't go through this helper — they call
/// [`cloudhub_http::HttpRequest::send`] directly with a sink/source-backed
/// `body_out`/`body_in` so large transfers never sit fully in memory.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

struct AcceptAnyStatus;

impl Callback for AcceptAnyStatus {
    fn is_success(&self, _code: u16, _headers: &[(String, String)]) -> bool {
        true
    }
}

/// Sends one request and buffers the full body, regardless of status —
/// callers decide what counts as success via [`ensure_success`].
pub async fn execute(
    http: &dyn HttpEngine,
    method: HttpMethod,
    url: &str,
    headers: &[(String, String)],
    query: &[(String, String)],
    body_in: Option<Vec<u8>>,
    follow_redirect: bool,
) -> Result<RawResponse, CoreError> {
    let mut request = http.create(url, method, follow_redirect);
    for (k, v) in headers {
        request.set_header(k, v);
    }
    for (k, v) in query {
        request.set_parameter(k, v);
    }

    let body = std::sync::Mutex::new(Vec::new());
    let response = request
        .send(
            body_in,
            &mut |chunk| {
                body.lock().unwrap().extend_from_slice(chunk);
                Ok(())
            },
            &mut |chunk| {
                body.lock().unwrap().extend_from_slice(chunk);
                Ok(())
            },
            &mut AcceptAnyStatus,
        )
        .await
        .map_err(map_http_error)?;

    Ok(RawResponse {
        status: response.status,
        headers: response.headers,
        body: body.into_inner().unwrap(),
    })
}

fn map_http_error(e: HttpError) -> CoreError {
    match e {
        HttpError::Cancelled => CoreError::aborted(),
        HttpError::Transport(e) => CoreError::transport(e.to_string()),
        HttpError::Io(e) => CoreError::transport(e.to_string()),
    }
}

/// Maps a non-2xx response to a [`CoreError::http`], embedding the body.
pub fn ensure_success(response: &RawResponse) -> Result<(), CoreError> {
    if (200..300).contains(&response.status) {
        Ok(())
    } else {
        Err(CoreError::http(
            response.status as i32,
            response.body_str().into_owned(),
        ))
    }
}

pub fn parse_json<T: serde::de::DeserializeOwned>(response: &RawResponse) -> Result<T, CoreError> {
    serde_json::from_slice(&response.body).map_err(|e| CoreError::parse(e.to_string()))
}

/// Sends a bearer-authorized request, running the reauthorization protocol
/// on a reauth-eligible status (SPEC_FULL.md §4.4 steps 1-5): one retry with
/// a freshly refreshed token, never more.
pub async fn authorized_request(
    ctx: &ProviderContext,
    method: HttpMethod,
    url: &str,
    headers: &[(String, String)],
    query: &[(String, String)],
    body_in: Option<Vec<u8>>,
    reauth_codes: &[u16],
) -> Result<RawResponse, CoreError> {
    let attempt = |token: String| {
        let mut with_auth = headers.to_vec();
        with_auth.push(("Authorization".to_string(), format!("Bearer {token}")));
        with_auth
    };

    let token = ctx.auth.current_token().await;
    let response = execute(
        ctx.http.as_ref(),
        method,
        url,
        &attempt(token.access_token.clone()),
        query,
        body_in.clone(),
        true,
    )
    .await?;

    if reauth_codes.contains(&response.status) {
        let refreshed = ctx.auth.reauthorize().await?;
        return execute(
            ctx.http.as_ref(),
            method,
            url,
            &attempt(refreshed.access_token),
            query,
            body_in,
            true,
        )
        .await;
    }

    Ok(response)
}

/// The reauth-eligible status set most bearer-token providers share. 429s
/// are not included: they are handled by the caller's own retry/backoff,
/// not the authorization state machine.
pub const DEFAULT_REAUTH_CODES: &[u16] = &[401];

/// [`cloudhub_oauth::Refresher`] for every OAuth2 authorization-code
/// provider (Google, OneDrive, Dropbox, Box, hubiC's bootstrap step):
/// refreshing just re-runs the PKCE flow's token-endpoint refresh grant.
pub struct PkceRefresher {
    pub flow: Arc<cloudhub_oauth::PkceFlow>,
}

#[async_trait::async_trait]
impl cloudhub_oauth::Refresher for PkceRefresher {
    async fn refresh(&self, current: &Token) -> Result<Token, CoreError> {
        self.flow.refresh_token(&current.refresh_token).await
    }
}

/// Builds the [`Auth`] state machine and the [`cloudhub_oauth::PkceFlow`]
/// for a standard OAuth2 provider from its hints and the current token, per
/// SPEC_FULL.md §4.4. The same flow handle drives both the adapter's
/// `authorize_library_url`/`exchange_code` and the shared refresher.
pub fn oauth2_auth(
    token: Token,
    client_id: String,
    client_secret: Option<String>,
    auth_url: String,
    token_url: String,
    redirect_uri: String,
    scopes: Vec<String>,
    callback: Option<Arc<dyn AuthCallback>>,
) -> Result<(Arc<Auth>, Arc<cloudhub_oauth::PkceFlow>), CoreError> {
    let config = cloudhub_oauth::PkceConfig {
        client_id,
        client_secret,
        auth_url,
        token_url,
        redirect_uri,
        scopes,
    };
    let flow = Arc::new(cloudhub_oauth::PkceFlow::new(&config)?);
    let refresher: Arc<dyn cloudhub_oauth::Refresher> = Arc::new(PkceRefresher { flow: flow.clone() });
    Ok((Arc::new(Auth::with_callback(token, refresher, callback)), flow))
}

/// Holds the PKCE verifier minted by `authorize_library_url` until the
/// matching `exchange_code` call consumes it.
///
/// The `CloudProvider` port separates the two calls (one mints an
/// authorize URL, a later one exchanges a code), but `oauth2`'s PKCE API
/// ties the verifier to the specific authorize-URL call that generated it;
/// this bridges the two without widening the port's signature.
#[derive(Default)]
pub struct PendingVerifier(Mutex<Option<String>>);

impl PendingVerifier {
    pub fn new() -> Self {
        Self(Mutex::new(None))
    }

    pub fn store(&self, verifier: oauth2::PkceCodeVerifier) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Some(verifier.secret().clone());
    }

    pub fn take(&self) -> oauth2::PkceCodeVerifier {
        let secret = self
            .0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_default();
        oauth2::PkceCodeVerifier::new(secret)
    }
}
