//! Cloud provider port (driven/secondary port)
//!
//! This module defines the interface every remote backend must satisfy —
//! the single trait the rest of the system dispatches through. Each
//! provider adapter (Google Drive, OneDrive, Dropbox, Box, S3, WebDAV,
//! hubiC, local filesystem, ...) lives in the `cloudhub-providers` crate
//! and implements [`CloudProvider`] by wrapping the generic
//! authorize-send-parse-reauth request template described in SPEC_FULL.md
//! §4.5 around its own wire format.
//!
//! ## Design notes
//!
//! - Methods return `Result<T, CoreError>`: the seven error kinds of
//!   SPEC_FULL.md §7 are the only vocabulary a caller needs, regardless of
//!   which remote produced the failure.
//! - `download_file`/`upload_file` take a sink/source rather than a
//!   `Vec<u8>` so large transfers stream instead of buffering whole files;
//!   see [`DownloadSink`] and [`UploadSource`].
//! - `list_directory` and `get_item` have default implementations in terms
//!   of `list_directory_page`, matching SPEC_FULL.md §4.6 exactly, so
//!   adapters only need to implement the page-at-a-time primitive.

use async_trait::async_trait;

use crate::domain::{CoreError, GeneralData, Hints, Item, ItemId, ListPage, Permission, Range, Token};

/// OAuth/authentication flow a provider's [`CloudProvider::authorize_library_url`]
/// and [`CloudProvider::exchange_code`] implement.
///
/// This is a documentation-level tag, not dispatched on: each adapter knows
/// its own flow and implements the two methods accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    /// Standard OAuth2 authorization-code flow (Google, OneDrive, Dropbox,
    /// Box, hubiC's bootstrap step).
    OAuth2AuthorizationCode,
    /// OAuth1.0a three-legged flow (4shared).
    OAuth1,
    /// No remote authorization step; the "code" exchanged is the credential
    /// itself (WebDAV, S3, Local).
    NonOAuth,
}

/// Whether an unimplemented `get_thumbnail` should attempt the optional
/// fetch-prefix/decode/re-encode fallback (SPEC_FULL.md §9 Open Questions)
/// or simply report [`crate::domain::ErrorKind::Unimplemented`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailPolicy {
    ProviderOnly,
    FallbackToPrefixDecode,
}

/// Destination for streamed download bytes.
///
/// Implemented by callers (a file writer, the range cache's fetch path, a
/// media-player buffer). Invoked from provider-adapter I/O code, which may
/// run on a thread-pool worker rather than the event-loop thread — see
/// SPEC_FULL.md §9 "Single-writer streams".
pub trait DownloadSink: Send {
    /// Consumes one chunk of response body bytes, in order.
    fn received_data(&mut self, chunk: &[u8]) -> Result<(), CoreError>;

    /// Reports `(total_bytes, bytes_so_far)`. `total_bytes` is `None` when
    /// the provider didn't report `Content-Length` (e.g. chunked transfer).
    fn progress(&mut self, _total: Option<u64>, _now: u64) {}
}

/// Source of bytes to upload.
///
/// `put_data` is repeatable: a reauth retry may rewind `offset` to replay
/// bytes already sent, so implementations must tolerate being called with a
/// smaller `offset` than the high-water mark of a previous call.
pub trait UploadSource: Send {
    /// Total size in bytes, when known up front (always known for in-memory
    /// and local-file sources; streamed sources may return `None`).
    fn size(&self) -> Option<u64>;

    /// Fills `buf` starting at `offset`, returning the number of bytes
    /// written (`0` at EOF).
    fn put_data(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;
}

/// Side channel a provider's internal auth state machine reports through
/// when reauthorization fails outright (SPEC_FULL.md §6-7): the factory
/// that built the provider implements this to remove the dead account
/// rather than leave callers retrying a token that can never refresh.
///
/// Every operation also still resolves its own `Result` normally —
/// `done` is an additional notification, not a replacement for the
/// per-call error.
pub trait AuthCallback: Send + Sync {
    /// Whether the provider should pause and wait for a fresh authorization
    /// code (via the loopback server) rather than failing immediately.
    fn user_consent_required(&self) -> bool {
        false
    }

    /// Called exactly once when the authorization flow that started with
    /// `AuthorizationRequired` finishes, successfully or not.
    fn done(&self, _result: Result<(), CoreError>) {}
}

/// The polymorphic backend contract every provider satisfies.
///
/// All methods are the "one metadata GET", "one HTTP call" primitives from
/// SPEC_FULL.md §4.6; composite operations (`list_directory`, `get_item`)
/// have default implementations built from them.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Exact provider name from SPEC_FULL.md §6 (`"google"`, `"onedrive"`, ...).
    fn name(&self) -> &str;

    /// Base URL override in effect, if any (WebDAV, S3-compatible stores).
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// The provider's root item. Stable within a process; the only item
    /// allowed a provider-dependent reserved id (`"root"`, `"0"`, `"/"`, ...).
    fn root_directory(&self) -> Item;

    /// Read/write permission this instance was constructed with.
    fn permission(&self) -> Permission;

    /// Hints this instance was constructed with (echoed back per §3).
    fn hints(&self) -> &Hints;

    /// The current token (refresh + access + expiry).
    fn token(&self) -> Token;

    /// URL the end user opens to grant consent (or the loopback login form
    /// URL for non-OAuth providers).
    fn authorize_library_url(&self) -> String;

    /// Runs the code-for-token exchange. For non-OAuth providers the code
    /// *is* the token (base64-encoded credential blob) and this is a no-op
    /// that returns it verbatim.
    async fn exchange_code(&self, code: &str) -> Result<Token, CoreError>;

    /// Fetches a fresh access token. For non-OAuth providers, a validity
    /// probe against the current credential.
    async fn refresh(&self) -> Result<Token, CoreError>;

    /// One page of a directory listing. Tie-break on identical filenames is
    /// remote insertion order.
    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError>;

    /// Iteratively calls [`Self::list_directory_page`] until `next_token` is
    /// empty, concatenating every page in arrival order.
    async fn list_directory(&self, dir: &Item) -> Result<Vec<Item>, CoreError> {
        let mut items = Vec::new();
        let mut token = String::new();
        loop {
            let page = self.list_directory_page(dir, &token).await?;
            items.extend(page.items);
            if page.next_token.is_empty() {
                break;
            }
            token = page.next_token;
        }
        Ok(items)
    }

    /// Walks an absolute POSIX-style path component by component via
    /// repeated [`Self::list_directory`] plus filename lookup.
    ///
    /// # Errors
    /// [`crate::domain::ErrorKind::NotFound`] if any component is absent.
    async fn get_item(&self, path: &str) -> Result<Item, CoreError> {
        let mut current = self.root_directory();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let children = self.list_directory(&current).await?;
            current = children
                .into_iter()
                .find(|c| c.filename == component)
                .ok_or_else(|| CoreError::not_found(format!("no such path component: {component}")))?;
        }
        Ok(current)
    }

    /// One metadata GET by id.
    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError>;

    /// Resolves a direct download URL for `item`: a metadata field, a
    /// HEAD-probed redirect location, or a synthesized `file_url`-prefixed
    /// link. Must HEAD a synthesized URL to confirm a 2xx before returning it.
    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError>;

    /// Streams `item`'s content in `range` to `sink`, invoking
    /// `sink.received_data` in order and calling `sink.progress` as bytes
    /// arrive. `range` full-from-start still honors `Range` semantics when
    /// the provider supports arbitrary ranges.
    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError>;

    /// Uploads a new file named `filename` under `parent`, reading from
    /// `source`. Chunked-upload providers honor `Content-Range` and session
    /// continuation across retries.
    async fn upload_file(
        &self,
        parent: &Item,
        filename: &str,
        source: &mut (dyn UploadSource + '_),
    ) -> Result<Item, CoreError>;

    /// Creates a directory named `name` under `parent`.
    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError>;

    /// Deletes `item`.
    async fn delete(&self, item: &Item) -> Result<(), CoreError>;

    /// Moves `item` to be a child of `new_parent`, keeping its filename.
    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError>;

    /// Renames `item` in place.
    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError>;

    /// Fetches a small thumbnail image, if the provider (or the optional
    /// `thumbnails` fallback) can produce one.
    ///
    /// # Errors
    /// [`crate::domain::ErrorKind::Unimplemented`] when neither is available
    /// — never silently succeeds with an empty image.
    async fn get_thumbnail(&self, item: &Item) -> Result<Vec<u8>, CoreError>;

    /// Account quota and identity.
    async fn general_data(&self) -> Result<GeneralData, CoreError>;

    /// Rejects a mutating call with [`CoreError::service_unavailable`] when
    /// this instance is [`Permission::ReadOnly`]. Adapters call this at the
    /// top of every mutating method before doing any I/O.
    fn require_read_write(&self, operation: &str) -> Result<(), CoreError> {
        if self.permission().allows_write() {
            Ok(())
        } else {
            Err(CoreError::service_unavailable(format!(
                "{operation}: provider {} is read-only",
                self.name()
            )))
        }
    }
}
