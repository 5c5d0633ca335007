//! OAuth2 authorization-code flow with PKCE (RFC 7636).
//!
//! Generalizes the reference adapter's `PKCEFlow`/`OAuth2Config` (originally
//! hardcoded to Microsoft's endpoints) into a provider-agnostic flow: every
//! OAuth2 provider (Google, OneDrive, Dropbox, Box, hubiC's bootstrap step)
//! constructs a [`PkceConfig`] with its own endpoints and scopes and drives
//! the same [`PkceFlow`].

use chrono::{Duration, Utc};
use cloudhub_core::domain::{CoreError, Token};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};

/// Per-provider OAuth2 configuration.
#[derive(Debug, Clone)]
pub struct PkceConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

type Client =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Generates authorization URLs and performs the code/refresh-token
/// exchanges for one provider's OAuth2 configuration.
pub struct PkceFlow {
    client: Client,
    scopes: Vec<String>,
}

impl PkceFlow {
    pub fn new(config: &PkceConfig) -> Result<Self, CoreError> {
        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(config.auth_url.clone())
                    .map_err(|e| CoreError::auth(format!("invalid authorization URL: {e}")))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| CoreError::auth(format!("invalid token URL: {e}")))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_uri.clone())
                    .map_err(|e| CoreError::auth(format!("invalid redirect URI: {e}")))?,
            );
        if let Some(secret) = &config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        Ok(Self {
            client,
            scopes: config.scopes.clone(),
        })
    }

    /// Returns `(authorization_url, csrf_token, pkce_verifier)`. The
    /// verifier must be retained until [`Self::exchange_code`].
    pub fn generate_auth_url(&self) -> (String, CsrfToken, PkceCodeVerifier) {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = self.client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, csrf) = request.set_pkce_challenge(challenge).url();
        (url.to_string(), csrf, verifier)
    }

    pub async fn exchange_code(
        &self,
        code: String,
        verifier: PkceCodeVerifier,
    ) -> Result<Token, CoreError> {
        let http_client = reqwest::Client::new();
        let result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .request_async(&http_client)
            .await
            .map_err(|e| CoreError::auth(format!("code exchange failed: {e}")))?;

        Ok(token_from_response(result))
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Token, CoreError> {
        let http_client = reqwest::Client::new();
        let result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await
            .map_err(|e| CoreError::auth(format!("refresh failed: {e}")))?;

        let mut token = token_from_response(result);
        if token.refresh_token.is_empty() {
            token.refresh_token = refresh_token.to_string();
        }
        Ok(token)
    }
}

fn token_from_response<TR>(response: TR) -> Token
where
    TR: TokenResponse,
{
    let expires_in = response
        .expires_in()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(3600);
    let refresh_token = response
        .refresh_token()
        .map(|t| t.secret().to_string())
        .unwrap_or_default();

    Token {
        refresh_token,
        access_token: response.access_token().secret().to_string(),
        expires_in,
        acquired_at: Utc::now(),
    }
}

/// Convenience: whether a [`Token`] minted `expires_in` seconds ago with
/// `acquired_at` is still within a small safety margin of expiry.
pub fn expires_soon(token: &Token, margin: Duration) -> bool {
    let expiry = token.acquired_at + Duration::seconds(token.expires_in);
    Utc::now() + margin >= expiry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PkceConfig {
        PkceConfig {
            client_id: "test-client".to_string(),
            client_secret: None,
            auth_url: "https://example.test/authorize".to_string(),
            token_url: "https://example.test/token".to_string(),
            redirect_uri: "http://127.0.0.1:12345/google".to_string(),
            scopes: vec!["drive.readonly".to_string()],
        }
    }

    #[test]
    fn generates_auth_url_with_pkce_challenge() {
        let flow = PkceFlow::new(&config()).unwrap();
        let (url, _csrf, _verifier) = flow.generate_auth_url();
        assert!(url.contains("example.test/authorize"));
        assert!(url.contains("code_challenge"));
        assert!(url.contains("test-client"));
    }
}
