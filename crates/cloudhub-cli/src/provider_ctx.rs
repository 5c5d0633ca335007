//! Wires a provider name plus the keyring/environment into a live
//! [`CloudProvider`], the plumbing every subcommand needs before it can
//! make its one call.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cloudhub_core::config::Config;
use cloudhub_core::domain::{Hints, Permission, Token};
use cloudhub_core::ports::cloud_provider::CloudProvider;
use cloudhub_http::ReqwestEngine;
use cloudhub_oauth::KeyringStore;
use cloudhub_providers::factory::create_provider;
use cloudhub_providers::common::InitData;
use cloudhub_runtime::ThreadPool;

/// Single local account per provider; this CLI doesn't multiplex accounts.
pub const KEYRING_ACCOUNT: &str = "default";

/// Loads configuration from `--config <path>` (propagated via
/// `CLOUDHUB_CONFIG_PATH` by `main`) when set, falling back to
/// [`Config::default_path`].
pub fn load_config() -> Config {
    match std::env::var_os("CLOUDHUB_CONFIG_PATH") {
        Some(path) => Config::load_or_default(std::path::Path::new(&path)),
        None => Config::load_or_default(&Config::default_path()),
    }
}

/// Collects the hints a provider's constructor expects: OAuth client
/// credentials from the environment (`CLOUDHUB_<PROVIDER>_CLIENT_ID` /
/// `_CLIENT_SECRET`), the redirect URI from configuration, and any
/// per-provider `endpoint`/`root` override.
pub fn hints_for(provider: &str, config: &Config) -> Hints {
    let mut hints: Hints = HashMap::new();
    let env_prefix = provider.to_ascii_uppercase().replace(['-', '4'], "_");

    if let Ok(id) = std::env::var(format!("CLOUDHUB_{env_prefix}_CLIENT_ID")) {
        hints.insert("client_id".to_string(), id);
    }
    if let Ok(secret) = std::env::var(format!("CLOUDHUB_{env_prefix}_CLIENT_SECRET")) {
        hints.insert("client_secret".to_string(), secret);
    }
    hints.insert("redirect_uri".to_string(), format!("{}/{provider}", config.oauth.redirect_uri));

    if let Some(endpoint) = config.providers.endpoint.get(provider) {
        hints.insert("endpoint".to_string(), endpoint.clone());
    }
    if let Ok(root) = std::env::var(format!("CLOUDHUB_{env_prefix}_ROOT")) {
        hints.insert("root".to_string(), root);
    }

    hints
}

fn init_data(token: Token, hints: Hints) -> InitData {
    InitData {
        token,
        hints,
        permission: Permission::ReadWrite,
        callback: None,
        http: Arc::new(ReqwestEngine::new()),
        thread_pool: Arc::new(ThreadPool::new(4)),
    }
}

/// Builds a provider for an authorization flow that hasn't produced a token
/// yet (`auth login`): an empty non-OAuth token placeholder, replaced the
/// moment `exchange_code` returns.
pub fn new_provider(provider: &str, config: &Config) -> Result<Arc<dyn CloudProvider>> {
    let hints = hints_for(provider, config);
    create_provider(provider, init_data(Token::non_oauth(String::new()), hints))
        .with_context(|| format!("constructing provider '{provider}'"))
}

/// Builds a provider from the token persisted in the keyring by a prior
/// `auth login`/`auth refresh`.
pub fn load_provider(provider: &str, config: &Config) -> Result<Arc<dyn CloudProvider>> {
    let token = KeyringStore::load(provider, KEYRING_ACCOUNT)
        .with_context(|| format!("reading keyring entry for '{provider}'"))?;
    let Some(token) = token else {
        bail!("no stored credentials for '{provider}'; run `cloudhub auth login {provider}` first");
    };
    let hints = hints_for(provider, config);
    create_provider(provider, init_data(token, hints))
        .with_context(|| format!("constructing provider '{provider}'"))
}

pub fn store_token(provider: &str, token: &Token) -> Result<()> {
    KeyringStore::store(provider, KEYRING_ACCOUNT, token)
        .with_context(|| format!("storing credentials for '{provider}'"))
}
