//! String->string configuration map passed at provider construction.

use std::collections::HashMap;

/// Recognized [`Hints`] keys (see SPEC_FULL.md §3).
pub mod keys {
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const STATE: &str = "state";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const TEMPORARY_DIRECTORY: &str = "temporary_directory";
    pub const FILE_URL: &str = "file_url";
    pub const LOGIN_PAGE: &str = "login_page";
    pub const SUCCESS_PAGE: &str = "success_page";
    pub const ERROR_PAGE: &str = "error_page";
    pub const ENDPOINT: &str = "endpoint";
}

/// Configuration hints, passed into [`crate::ports::cloud_provider::CloudProvider`]
/// construction and returned from it unchanged (plus any provider-filled
/// defaults, e.g. WebDAV fills `endpoint` from the persisted token).
pub type Hints = HashMap<String, String>;

/// Small helpers for reading [`Hints`] with the defaults each provider
/// adapter otherwise duplicates.
pub trait HintsExt {
    fn get_or_empty(&self, key: &str) -> &str;
}

impl HintsExt for Hints {
    fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).map(String::as_str).unwrap_or("")
    }
}
