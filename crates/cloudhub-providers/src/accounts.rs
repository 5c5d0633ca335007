//! Credential persistence (SPEC_FULL.md §11.3).
//!
//! One JSON object per line: `{"provider", "token", "access_token"}`, where
//! `token` is the refresh token. Callers supply a `build` closure because
//! only they know the per-provider hints (client id/secret, endpoint
//! override, ...) a reconstructed provider needs.

use std::io::{BufRead, Write};
use std::sync::Arc;

use cloudhub_core::domain::{CoreError, Token};
use cloudhub_core::ports::cloud_provider::CloudProvider;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct AccountLine {
    provider: String,
    token: String,
    access_token: String,
}

/// Writes one line per provider: its name, refresh token, and access token.
pub fn dump_accounts<W: Write>(providers: &[Arc<dyn CloudProvider>], mut w: W) -> Result<(), CoreError> {
    for provider in providers {
        let token = provider.token();
        let line = AccountLine {
            provider: provider.name().to_string(),
            token: token.refresh_token,
            access_token: token.access_token,
        };
        let json = serde_json::to_string(&line)?;
        w.write_all(json.as_bytes())
            .and_then(|()| w.write_all(b"\n"))
            .map_err(CoreError::from)?;
    }
    Ok(())
}

/// Reads the format [`dump_accounts`] writes and reconstructs a provider per
/// line via `build(provider_name, token)`.
pub fn load_accounts<R, F>(r: R, build: F) -> Result<Vec<Arc<dyn CloudProvider>>, CoreError>
where
    R: BufRead,
    F: Fn(&str, Token) -> Result<Arc<dyn CloudProvider>, CoreError>,
{
    let mut providers = Vec::new();
    for line in r.lines() {
        let line = line.map_err(CoreError::from)?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: AccountLine = serde_json::from_str(&line)?;
        let token = Token::new(parsed.token, parsed.access_token, 0);
        providers.push(build(&parsed.provider, token)?);
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhub_core::domain::Permission;
    use cloudhub_http::testing::MockHttpEngine;
    use cloudhub_runtime::ThreadPool;
    use std::collections::HashMap;

    fn build(name: &str, token: Token) -> Result<Arc<dyn CloudProvider>, CoreError> {
        let init = crate::common::InitData {
            token,
            hints: HashMap::from([("root".to_string(), "/tmp".to_string())]),
            permission: Permission::ReadWrite,
            callback: None,
            http: Arc::new(MockHttpEngine::new(Vec::new())),
            thread_pool: Arc::new(ThreadPool::new(1)),
        };
        crate::factory::create_provider(name, init)
    }

    #[test]
    fn dump_then_load_round_trips_tokens() {
        let providers = vec![build("local", Token::new("r1", "a1", 0)).unwrap()];

        let mut buf = Vec::new();
        dump_accounts(&providers, &mut buf).unwrap();

        let reloaded = load_accounts(buf.as_slice(), build).unwrap();

        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].name(), "local");
        assert_eq!(reloaded[0].token().refresh_token, "r1");
        assert_eq!(reloaded[0].token().access_token, "a1");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let reloaded = load_accounts("\n\n".as_bytes(), build).unwrap();
        assert!(reloaded.is_empty());
    }
}
