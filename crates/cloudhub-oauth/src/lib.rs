//! Authorization flows, token storage, and the loopback callback server
//! (SPEC_FULL.md §4.1, §4.4, §6).
//!
//! - [`pkce`] — OAuth2 authorization-code + PKCE flow shared by Google,
//!   OneDrive, Dropbox, Box, and hubiC's bootstrap step.
//! - [`oauth1`] — OAuth1.0a three-legged flow and per-request HMAC-SHA1
//!   signing, used only by 4shared.
//! - [`keyring_store`] — secure token persistence via the system keyring.
//! - [`loopback`] — the shared OAuth redirect server every provider's flow
//!   waits on.
//! - [`state_machine`] — [`state_machine::Auth`], the reauthorization
//!   protocol (exactly one in-flight refresh per provider, shared by
//!   concurrent callers).

pub mod keyring_store;
pub mod loopback;
pub mod oauth1;
pub mod pkce;
pub mod state_machine;

pub use keyring_store::KeyringStore;
pub use loopback::{CallbackParams, LoopbackServer};
pub use oauth1::{OAuth1Config, OAuth1Token};
pub use pkce::{PkceConfig, PkceFlow};
pub use state_machine::{Auth, AuthState, Refresher};
