//! HTTP engine abstraction.
//!
//! Provider adapters never talk to `reqwest` directly: they go through
//! [`HttpEngine`]/[`HttpRequest`], a pluggable pair of traits so the real
//! network engine ([`ReqwestEngine`]) and a canned-response test double
//! ([`testing::MockHttpEngine`]) are interchangeable. This mirrors the way
//! `lnxdrive-graph::client::GraphClient` wraps `reqwest::Client` behind a
//! narrow request/response surface, generalized to a trait so the engine
//! itself is swappable rather than baked into each provider.

mod engine;
pub mod testing;

pub use engine::{
    Callback, HttpEngine, HttpMethod, HttpRequest, HttpResponse, NoopCallback, ReqwestEngine,
};

use thiserror::Error;

/// Errors surfaced by the HTTP layer before a provider gets a chance to
/// interpret status codes or bodies for itself.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
