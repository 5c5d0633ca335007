//! Canned-response test double for [`crate::HttpEngine`].
//!
//! Provider adapters are exercised against this instead of a real network
//! connection, matching SPEC_FULL.md §13: a fixed sequence of responses is
//! queued up front and consumed FIFO by every request the adapter issues,
//! regardless of URL. Every request that goes out is recorded for later
//! assertion via [`MockHttpEngine::recorded_requests`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Callback, HttpEngine, HttpError, HttpMethod, HttpRequest, HttpResponse};

/// One canned response: status, headers, and a body handed to `body_out`
/// (or `error_out` when `status` falls outside `[200, 399]`).
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into().into_bytes(),
        }
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

/// A request the mock engine observed, recorded for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

struct Shared {
    responses: Vec<MockResponse>,
    requests: Vec<RecordedRequest>,
}

/// Queue of [`MockResponse`]s consumed in FIFO order by every request issued
/// through this engine.
///
/// Most provider tests issue a known, ordered sequence of calls (probe auth,
/// list page, download), so FIFO replay is simpler than URL matching and
/// keeps fixtures in the order the test reads naturally.
pub struct MockHttpEngine {
    shared: Arc<Mutex<Shared>>,
}

impl MockHttpEngine {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                responses,
                requests: Vec::new(),
            })),
        }
    }

    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.shared.lock().unwrap().requests.clone()
    }
}

impl HttpEngine for MockHttpEngine {
    fn create(&self, url: &str, method: HttpMethod, _follow_redirect: bool) -> Box<dyn HttpRequest> {
        Box::new(MockRequest {
            shared: self.shared.clone(),
            method,
            url: url.to_string(),
            headers: Vec::new(),
            params: Vec::new(),
        })
    }
}

struct MockRequest {
    shared: Arc<Mutex<Shared>>,
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

#[async_trait]
impl HttpRequest for MockRequest {
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

        let canned = {
            let mut shared = self.shared.lock().unwrap();
            shared.requests.push(RecordedRequest {
                method: self.method,
                url: self.url.clone(),
                headers: self.headers.clone(),
                params: self.params.clone(),
                body: body_in,
            });
            if shared.responses.is_empty() {
                None
            } else {
                Some(shared.responses.remove(0))
            }
        };

        let canned = canned.unwrap_or_else(|| MockResponse::empty(500));
        let success = callback.is_success(canned.status, &canned.headers);

        callback.progress(Some(canned.body.len() as u64), canned.body.len() as u64);
        if success {
            body_out(&canned.body)?;
        } else {
            error_out(&canned.body)?;
        }

        Ok(HttpResponse {
            status: canned.status,
            headers: canned.headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_responses_in_fifo_order_and_records_requests() {
        let engine = MockHttpEngine::new(vec![
            MockResponse::json(200, r#"{"ok":true}"#),
            MockResponse::empty(404),
        ]);

        let mut first = engine.create("https://example.test/a", HttpMethod::Get, true);
        first.set_header("Authorization", "Bearer token");
        let mut body = Vec::new();
        let mut err = Vec::new();
        let response = first
            .send(
                None,
                &mut |chunk| {
                    body.extend_from_slice(chunk);
                    Ok(())
                },
                &mut |chunk| {
                    err.extend_from_slice(chunk);
                    Ok(())
                },
                &mut crate::NoopCallback,
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(body, br#"{"ok":true}"#);

        let mut second = engine.create("https://example.test/b", HttpMethod::Get, true);
        let response = second
            .send(
                None,
                &mut |_| Ok(()),
                &mut |_| Ok(()),
                &mut crate::NoopCallback,
            )
            .await
            .unwrap();
        assert_eq!(response.status, 404);

        let recorded = engine.recorded_requests();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].url, "https://example.test/a");
        assert_eq!(recorded[1].url, "https://example.test/b");
    }
}
