//! OAuth1.0a three-legged flow with per-request HMAC-SHA1 signing.
//!
//! The only provider that needs this is 4shared (SPEC_FULL.md §4.5); every
//! other OAuth-based provider speaks OAuth2 via [`crate::pkce`]. Signing
//! follows the same `Hmac<_>::new_from_slice` -> `update` -> `finalize`
//! shape as the S3 SigV4 signer in `cloudhub-providers::s3`, with `Sha1`
//! substituted for `Sha256` and a base64 (not hex) signature encoding per
//! the OAuth1 spec.

use base64::Engine;
use cloudhub_core::domain::CoreError;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

/// Per-provider OAuth1 configuration (consumer key/secret and the three
/// endpoint URLs of the request-token/authorize/access-token dance).
#[derive(Debug, Clone)]
pub struct OAuth1Config {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
    pub callback_uri: String,
}

/// A temporary or final OAuth1 token/secret pair.
#[derive(Debug, Clone)]
pub struct OAuth1Token {
    pub token: String,
    pub token_secret: String,
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            std::char::from_digit(n as u32, 36).unwrap()
        })
        .collect()
}

fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// Builds the `Authorization: OAuth ...` header value for one request,
/// signing `method`+`url`+`params`+token secret with HMAC-SHA1 per RFC 5849 §3.4.2.
pub fn sign(
    config: &OAuth1Config,
    method: &str,
    url: &str,
    extra_params: &BTreeMap<String, String>,
    token: Option<&OAuth1Token>,
) -> Result<String, CoreError> {
    let mut params: BTreeMap<String, String> = extra_params.clone();
    params.insert("oauth_consumer_key".to_string(), config.consumer_key.clone());
    params.insert("oauth_nonce".to_string(), nonce());
    params.insert("oauth_signature_method".to_string(), "HMAC-SHA1".to_string());
    params.insert("oauth_timestamp".to_string(), timestamp());
    params.insert("oauth_version".to_string(), "1.0".to_string());
    if let Some(token) = token {
        params.insert("oauth_token".to_string(), token.token.clone());
    }

    let param_string = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(&config.consumer_secret),
        percent_encode(token.map(|t| t.token_secret.as_str()).unwrap_or(""))
    );

    let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
        .map_err(|e| CoreError::auth(format!("invalid OAuth1 signing key: {e}")))?;
    mac.update(base_string.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    params.insert("oauth_signature".to_string(), signature);

    let header = params
        .iter()
        .map(|(k, v)| format!(r#"{}="{}""#, percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!("OAuth {header}"))
}

/// Step 1 of the three-legged dance: obtains an unauthorized request token.
pub async fn request_token(
    client: &reqwest::Client,
    config: &OAuth1Config,
) -> Result<OAuth1Token, CoreError> {
    let mut params = BTreeMap::new();
    params.insert("oauth_callback".to_string(), config.callback_uri.clone());
    let header = sign(config, "POST", &config.request_token_url, &params, None)?;

    let response = client
        .post(&config.request_token_url)
        .header("Authorization", header)
        .send()
        .await
        .map_err(|e| CoreError::transport(e.to_string()))?;

    let body = response
        .text()
        .await
        .map_err(|e| CoreError::transport(e.to_string()))?;
    parse_token_response(&body)
}

/// Step 3: exchanges the user-authorized request token for an access token.
pub async fn access_token(
    client: &reqwest::Client,
    config: &OAuth1Config,
    authorized: &OAuth1Token,
    verifier: &str,
) -> Result<OAuth1Token, CoreError> {
    let mut params = BTreeMap::new();
    params.insert("oauth_verifier".to_string(), verifier.to_string());
    let header = sign(
        config,
        "POST",
        &config.access_token_url,
        &params,
        Some(authorized),
    )?;

    let response = client
        .post(&config.access_token_url)
        .header("Authorization", header)
        .send()
        .await
        .map_err(|e| CoreError::transport(e.to_string()))?;

    let body = response
        .text()
        .await
        .map_err(|e| CoreError::transport(e.to_string()))?;
    parse_token_response(&body)
}

/// The authorize-library URL the user opens to grant consent for `token`.
pub fn authorize_url(config: &OAuth1Config, token: &OAuth1Token) -> String {
    format!("{}?oauth_token={}", config.authorize_url, token.token)
}

fn parse_token_response(body: &str) -> Result<OAuth1Token, CoreError> {
    let mut token = None;
    let mut secret = None;
    for pair in body.split('&') {
        let mut parts = pair.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some("oauth_token"), Some(v)) => token = Some(v.to_string()),
            (Some("oauth_token_secret"), Some(v)) => secret = Some(v.to_string()),
            _ => {}
        }
    }
    match (token, secret) {
        (Some(token), Some(token_secret)) => Ok(OAuth1Token { token, token_secret }),
        _ => Err(CoreError::parse("missing oauth_token/oauth_token_secret in response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuth1Config {
        OAuth1Config {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            request_token_url: "https://api.4shared.test/oauth/request_token".to_string(),
            authorize_url: "https://api.4shared.test/oauth/authorize".to_string(),
            access_token_url: "https://api.4shared.test/oauth/access_token".to_string(),
            callback_uri: "http://127.0.0.1:12345/4shared".to_string(),
        }
    }

    #[test]
    fn sign_produces_oauth_header_with_signature() {
        let header = sign(&config(), "GET", "https://api.4shared.test/v1_2/files", &BTreeMap::new(), None)
            .unwrap();
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature="));
        assert!(header.contains("oauth_consumer_key=\"key\""));
    }

    #[test]
    fn parse_token_response_extracts_token_and_secret() {
        let token = parse_token_response("oauth_token=abc&oauth_token_secret=xyz&oauth_callback_confirmed=true").unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.token_secret, "xyz");
    }

    #[test]
    fn authorize_url_embeds_token() {
        let url = authorize_url(&config(), &OAuth1Token { token: "abc".to_string(), token_secret: "xyz".to_string() });
        assert_eq!(url, "https://api.4shared.test/oauth/authorize?oauth_token=abc");
    }
}
