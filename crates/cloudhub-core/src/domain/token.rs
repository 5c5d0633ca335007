//! OAuth refresh/access token pair.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Refresh/access credential pair persisted by the caller.
///
/// Providers without OAuth (WebDAV, S3, Local) encode their credential into
/// `refresh_token` (typically base64 of a small structured blob) and leave
/// `access_token` empty; see each adapter's `token_codec` module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Long-lived value the caller persists.
    pub refresh_token: String,
    /// Short-lived value attached to HTTP requests.
    pub access_token: String,
    /// Seconds from acquisition until `access_token` expires.
    pub expires_in: i64,
    /// When the token was acquired; used to compute expiry from `expires_in`.
    pub acquired_at: DateTime<Utc>,
}

impl Token {
    #[must_use]
    pub fn new(refresh_token: impl Into<String>, access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            access_token: access_token.into(),
            expires_in,
            acquired_at: Utc::now(),
        }
    }

    /// A token for a non-OAuth provider: the refresh token carries the
    /// whole credential and never expires on its own account.
    #[must_use]
    pub fn non_oauth(credential: impl Into<String>) -> Self {
        Self {
            refresh_token: credential.into(),
            access_token: String::new(),
            expires_in: 0,
            acquired_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        if self.expires_in <= 0 {
            return false;
        }
        Utc::now() >= self.acquired_at + Duration::seconds(self.expires_in)
    }
}
