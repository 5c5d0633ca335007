use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, redirect::Policy};

use crate::HttpError;

/// HTTP method for [`HttpEngine::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Propfind,
    Mkcol,
    Move,
    Copy,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Propfind => reqwest::Method::from_bytes(b"PROPFIND").unwrap(),
            HttpMethod::Mkcol => reqwest::Method::from_bytes(b"MKCOL").unwrap(),
            HttpMethod::Move => reqwest::Method::from_bytes(b"MOVE").unwrap(),
            HttpMethod::Copy => reqwest::Method::from_bytes(b"COPY").unwrap(),
        }
    }
}

/// Status/headers of a completed (or aborted) request.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Per-request hooks, checked and invoked while a [`HttpRequest::send`] runs.
///
/// The default `is_success` treats `[200, 399]` as success, matching
/// SPEC_FULL.md §4.1; adapters override it when a provider needs a narrower
/// window (e.g. treating a 3xx as failure when `follow_redirect` is false).
pub trait Callback: Send {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn is_success(&self, code: u16, _headers: &[(String, String)]) -> bool {
        (200..400).contains(&code)
    }

    fn progress(&mut self, _total: Option<u64>, _now: u64) {}
}

/// A [`Callback`] that never cancels and accepts the default success window.
pub struct NoopCallback;

impl Callback for NoopCallback {}

/// One in-flight (or about-to-be-sent) HTTP request.
///
/// Headers and query parameters may be set repeatedly before [`Self::send`];
/// last writer wins for a given key, matching SPEC_FULL.md §4.1.
#[async_trait]
pub trait HttpRequest: Send {
    fn set_header(&mut self, key: &str, value: &str);
    fn set_parameter(&mut self, key: &str, value: &str);

    /// Sends the request. `body_in` is the full request body, when any.
    /// `body_out` receives body chunks when [`Callback::is_success`] accepts
    /// the response status; otherwise chunks go to `error_out`.
    async fn send(
        &mut self,
        body_in: Option<Vec<u8>>,
        body_out: &mut (dyn for<'r> FnMut(&'r [u8]) -> Result<(), HttpError> + Send),
        error_out: &mut (dyn for<'r> FnMut(&'r [u8]) -> Result<(), HttpError> + Send),
        callback: &mut dyn Callback,
    ) -> Result<HttpResponse, HttpError>;
}

/// Factory for [`HttpRequest`] instances.
///
/// The core and every provider adapter depend only on this trait, never on
/// `reqwest` directly, so [`testing::MockHttpEngine`](crate::testing::MockHttpEngine)
/// is a drop-in substitute in tests.
pub trait HttpEngine: Send + Sync {
    fn create(&self, url: &str, method: HttpMethod, follow_redirect: bool) -> Box<dyn HttpRequest>;
}

/// Default engine, backed by `reqwest`.
pub struct ReqwestEngine {
    following: Client,
    non_following: Client,
}

impl ReqwestEngine {
    pub fn new() -> Self {
        Self {
            following: Client::new(),
            non_following: Client::builder()
                .redirect(Policy::none())
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for ReqwestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEngine for ReqwestEngine {
    fn create(&self, url: &str, method: HttpMethod, follow_redirect: bool) -> Box<dyn HttpRequest> {
        let client = if follow_redirect {
            self.following.clone()
        } else {
            self.non_following.clone()
        };
        Box::new(ReqwestRequest {
            client,
            url: url.to_string(),
            method,
            headers: Vec::new(),
            params: Vec::new(),
        })
    }
}

struct ReqwestRequest {
    client: Client,
    url: String,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

#[async_trait]
impl HttpRequest for ReqwestRequest {
    fn set_header(&mut self, key: &str, value: &str) {
        self.headers.retain(|(k, _)| k != key);
        self.headers.push((key.to_string(), value.to_string()));
    }

    fn set_parameter(&mut self, key: &str, value: &str) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.to_string()));
    }

    async fn send(
        &mut self,
        body_in: Option<Vec<u8>>,
        body_out: &mut (dyn for<'r> FnMut(&'r [u8]) -> Result<(), HttpError> + Send),
        error_out: &mut (dyn for<'r> FnMut(&'r [u8]) -> Result<(), HttpError> + Send),
        callback: &mut dyn Callback,
    ) -> Result<HttpResponse, HttpError> {
        if callback.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        let mut builder = self.client.request(self.method.as_reqwest(), &self.url);
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        if !self.params.is_empty() {
            builder = builder.query(&self.params);
        }
        if let Some(body) = body_in {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let success = callback.is_success(status, &headers);

        let total = response.content_length();
        let mut now = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if callback.is_cancelled() {
                return Err(HttpError::Cancelled);
            }
            let chunk = chunk?;
            now += chunk.len() as u64;
            if success {
                body_out(&chunk)?;
            } else {
                error_out(&chunk)?;
            }
            callback.progress(total, now);
        }

        Ok(HttpResponse { status, headers })
    }
}
