//! Secure token storage in the OS credential store.
//!
//! Generalizes the reference adapter's `KeyringTokenStorage` (hardcoded to
//! the service name `"lnxdrive"` and a single provider) to key entries by
//! `{service}/{provider}` so every provider's tokens live in their own
//! keyring entry under one umbrella service name.

use cloudhub_core::domain::{CoreError, Token};
use tracing::debug;

const KEYRING_SERVICE: &str = "cloudhub";

/// Stores and retrieves a provider's [`Token`] in the system keyring.
pub struct KeyringStore;

impl KeyringStore {
    fn entry(provider: &str, account: &str) -> Result<keyring::Entry, CoreError> {
        keyring::Entry::new(&format!("{KEYRING_SERVICE}:{provider}"), account)
            .map_err(|e| CoreError::auth(format!("keyring entry creation failed: {e}")))
    }

    pub fn store(provider: &str, account: &str, token: &Token) -> Result<(), CoreError> {
        let entry = Self::entry(provider, account)?;
        let json = serde_json::to_string(token)?;
        entry
            .set_password(&json)
            .map_err(|e| CoreError::auth(format!("failed to store token in keyring: {e}")))?;
        debug!(provider, account, "stored token in keyring");
        Ok(())
    }

    pub fn load(provider: &str, account: &str) -> Result<Option<Token>, CoreError> {
        let entry = Self::entry(provider, account)?;
        match entry.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CoreError::auth(format!("failed to read keyring: {e}"))),
        }
    }

    pub fn clear(provider: &str, account: &str) -> Result<(), CoreError> {
        let entry = Self::entry(provider, account)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CoreError::auth(format!("failed to clear keyring entry: {e}"))),
        }
    }
}
