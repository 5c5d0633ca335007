//! `cloudhub auth login <provider>` / `cloudhub auth refresh <provider>`.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use cloudhub_oauth::LoopbackServer;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx::{self, KEYRING_ACCOUNT};

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Run the authorization flow for a provider and store its token in the keyring.
    Login { provider: String },
    /// Exchange the stored refresh token for a fresh access token.
    Refresh { provider: String },
}

impl AuthCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            AuthCommand::Login { provider } => execute_login(provider, format).await,
            AuthCommand::Refresh { provider } => execute_refresh(provider, format).await,
        }
    }
}

async fn execute_login(provider: &str, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));
    let config = provider_ctx::load_config();

    let instance = provider_ctx::new_provider(provider, &config)?;
    let loopback = LoopbackServer::bind(&config.oauth.redirect_uri)
        .await
        .context("binding loopback callback server")?;

    let auth_url = instance.authorize_library_url();
    formatter.info(&format!("Open this URL to authorize {provider}:"));
    formatter.info(&auth_url);
    if webbrowser::open(&auth_url).is_err() {
        formatter.warn("could not open a browser automatically; open the URL above manually");
    }

    let callback = loopback.wait_for(None).await.context("waiting for OAuth callback")?;
    let code = callback
        .get("code")
        .or_else(|| callback.get("oauth_verifier"))
        .or_else(|| callback.get("credential"));
    let Some(code) = code else {
        bail!("callback did not carry an authorization code");
    };

    let token = instance.exchange_code(code).await.context("exchanging authorization code")?;
    provider_ctx::store_token(provider, &token)?;

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "provider": provider,
            "account": KEYRING_ACCOUNT,
        }));
    } else {
        formatter.success(&format!("Logged in to {provider}"));
    }
    Ok(())
}

async fn execute_refresh(provider: &str, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));
    let config = provider_ctx::load_config();

    let instance = provider_ctx::load_provider(provider, &config)?;
    let token = instance.refresh().await.context("refreshing token")?;
    provider_ctx::store_token(provider, &token)?;

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "provider": provider,
            "expires_in": token.expires_in,
        }));
    } else {
        formatter.success(&format!("Refreshed token for {provider}"));
    }
    Ok(())
}
