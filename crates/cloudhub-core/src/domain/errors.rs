//! Domain and operation error types.
//!
//! `DomainError` covers validation failures inside the domain layer itself
//! (invalid ids, malformed hints). `CoreError` is the error every provider
//! operation resolves its promise with — the seven kinds from the provider
//! contract (SPEC_FULL.md §7).

use thiserror::Error;

/// Errors raised validating domain values (ids, paths, hints).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid hint: {0}")]
    InvalidHint(String),
}

/// A synthetic status code for failures that don't originate from a remote
/// HTTP response.
pub const CODE_FAILURE: i32 = -1;
pub const CODE_ABORTED: i32 = -2;

/// The error every provider operation resolves its future with.
///
/// `code` is an HTTP status when the failure originated from the remote,
/// else one of the synthetic codes above (or a kind-specific sentinel).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {description} (code {code})")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub code: i32,
    pub description: String,
}

/// The seven error kinds of SPEC_FULL.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The HTTP engine reported a transport-level failure.
    Transport,
    /// A non-success status from the remote.
    Http,
    /// Cancelled by the caller.
    Aborted,
    /// Explicit 404 or local lookup miss.
    NotFound,
    /// Refresh failed, user declined, or code exchange returned a client error.
    Auth,
    /// The response body could not be interpreted.
    Parse,
    /// The operation is not supported by this backend.
    Unimplemented,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Http => "http",
            ErrorKind::Aborted => "aborted",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Auth => "auth",
            ErrorKind::Parse => "parse",
            ErrorKind::Unimplemented => "unimplemented",
        };
        f.write_str(s)
    }
}

impl CoreError {
    #[must_use]
    pub fn http(code: i32, description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Http,
            code,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn transport(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            code: CODE_FAILURE,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn aborted() -> Self {
        Self {
            kind: ErrorKind::Aborted,
            code: CODE_ABORTED,
            description: "aborted".to_string(),
        }
    }

    #[must_use]
    pub fn not_found(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: 404,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn auth(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Auth,
            code: CODE_FAILURE,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn parse(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Parse,
            code: CODE_FAILURE,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn unimplemented(op: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unimplemented,
            code: CODE_FAILURE,
            description: format!("not supported by this provider: {}", op.into()),
        }
    }

    #[must_use]
    pub fn service_unavailable(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Http,
            code: 503,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<DomainError> for CoreError {
    fn from(e: DomainError) -> Self {
        CoreError::parse(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::not_found(e.to_string()),
            _ => CoreError::transport(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_has_distinguished_code() {
        let e = CoreError::aborted();
        assert_eq!(e.code, CODE_ABORTED);
        assert!(e.is_kind(ErrorKind::Aborted));
    }

    #[test]
    fn http_error_keeps_remote_status() {
        let e = CoreError::http(404, "missing");
        assert_eq!(e.code, 404);
        assert!(e.is_kind(ErrorKind::Http));
    }
}
