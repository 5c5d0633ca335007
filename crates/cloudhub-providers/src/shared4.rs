//! 4shared adapter (SPEC_FULL.md §4.5 "4shared").
//!
//! The only provider speaking OAuth1 rather than OAuth2; every request goes
//! through [`cloudhub_oauth::oauth1::sign`] directly since `Auth`'s
//! reauthorization state machine assumes an OAuth2 bearer/refresh pair.
//! OAuth1 access tokens for 4shared don't expire, so `refresh` is a no-op.

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use cloudhub_oauth::oauth1::{self, OAuth1Config, OAuth1Token};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::common::{ensure_success, execute, InitData, ProviderContext};

const API_URL: &str = "https://api.4shared.com/v1_2/files";
const REQUEST_TOKEN_URL: &str = "https://www.4shared.com/oauth/request_token";
const AUTHORIZE_URL: &str = "https://www.4shared.com/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://www.4shared.com/oauth/access_token";

#[derive(Debug, Deserialize)]
struct FourSharedFile {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "isFolder")]
    is_folder: Option<bool>,
    #[serde(default, rename = "downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FourSharedListing {
    files: Vec<FourSharedFile>,
}

fn to_item(file: FourSharedFile) -> Result<Item, CoreError> {
    let item_type = if file.is_folder.unwrap_or(false) {
        ItemType::Directory
    } else {
        ItemType::from_filename(&file.name)
    };
    Ok(Item {
        id: ItemId::new(file.id)?,
        filename: file.name,
        size: file.size.into(),
        timestamp: None.into(),
        item_type,
        url: file.download_url,
        thumbnail_url: None,
    })
}

pub struct FourSharedProvider {
    ctx: ProviderContext,
    oauth_config: OAuth1Config,
    oauth_token: OAuth1Token,
    pending_request_token: Mutex<Option<OAuth1Token>>,
    root: Item,
}

impl FourSharedProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let oauth_config = OAuth1Config {
            consumer_key: init.hints.get("client_id").cloned().unwrap_or_default(),
            consumer_secret: init.hints.get("client_secret").cloned().unwrap_or_default(),
            request_token_url: REQUEST_TOKEN_URL.to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
            access_token_url: ACCESS_TOKEN_URL.to_string(),
            callback_uri: init.hints.get("redirect_uri").cloned().unwrap_or_default(),
        };
        let oauth_token = OAuth1Token {
            token: init.token.access_token.clone(),
            token_secret: init.token.refresh_token.clone(),
        };
        let token = init.token.clone();
        let auth = std::sync::Arc::new(cloudhub_oauth::Auth::new(token, std::sync::Arc::new(NeverRefresh)));
        let ctx = ProviderContext::new(init, auth);
        Ok(Self {
            ctx,
            oauth_config,
            oauth_token,
            pending_request_token: Mutex::new(None),
            root: Item::directory(ItemId::new("0")?, ""),
        })
    }

    fn auth_header(&self, method: &str, url: &str) -> Result<String, CoreError> {
        oauth1::sign(&self.oauth_config, method, url, &BTreeMap::new(), Some(&self.oauth_token))
    }

    /// Runs the first leg of the three-legged OAuth1 dance and returns the
    /// URL the user visits to grant consent.
    ///
    /// Not part of [`CloudProvider`]: that port's `authorize_library_url` is
    /// synchronous (fine for OAuth2 PKCE, which needs no network round trip
    /// to mint an authorize URL), but OAuth1 requires fetching a request
    /// token first. Callers building 4shared's authorization flow use this
    /// method instead of the port method.
    pub async fn begin_oauth1(&self) -> Result<String, CoreError> {
        let client = reqwest::Client::new();
        let request_token = oauth1::request_token(&client, &self.oauth_config).await?;
        let url = oauth1::authorize_url(&self.oauth_config, &request_token);
        *self.pending_request_token.lock().unwrap_or_else(|p| p.into_inner()) = Some(request_token);
        Ok(url)
    }
}

struct NeverRefresh;

#[async_trait]
impl cloudhub_oauth::Refresher for NeverRefresh {
    async fn refresh(&self, current: &Token) -> Result<Token, CoreError> {
        Ok(current.clone())
    }
}

#[async_trait]
impl CloudProvider for FourSharedProvider {
    fn name(&self) -> &str {
        "4shared"
    }

    fn root_directory(&self) -> Item {
        self.root.clone()
    }

    fn permission(&self) -> Permission {
        self.ctx.permission
    }

    fn hints(&self) -> &Hints {
        &self.ctx.hints
    }

    fn token(&self) -> Token {
        self.ctx.auth.token_snapshot()
    }

    fn authorize_library_url(&self) -> String {
        // OAuth1's request-token step needs a network round trip; see
        // `begin_oauth1` for the async equivalent this adapter actually uses.
        String::new()
    }

    async fn exchange_code(&self, code: &str) -> Result<Token, CoreError> {
        let request_token = self
            .pending_request_token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| CoreError::auth("no pending 4shared request token"))?;
        let client = reqwest::Client::new();
        let access = oauth1::access_token(&client, &self.oauth_config, &request_token, code).await?;
        Ok(Token::new(access.token_secret, access.token, 0))
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        Ok(self.token())
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        if !page_token.is_empty() {
            return Ok(ListPage { items: Vec::new(), next_token: String::new() });
        }
        let url = format!("{API_URL}/{}/children", dir.id.as_str());
        let header = self.auth_header("GET", &url)?;
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Get,
            &url,
            &[("Authorization".to_string(), header)],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        let listing: FourSharedListing = crate::common::parse_json(&response)?;
        Ok(ListPage {
            items: listing.files.into_iter().map(to_item).collect::<Result<_, _>>()?,
            next_token: String::new(),
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let url = format!("{API_URL}/{}/metadata", id.as_str());
        let header = self.auth_header("GET", &url)?;
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Get,
            &url,
            &[("Authorization".to_string(), header)],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        to_item(crate::common::parse_json(&response)?)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        item.url.clone().ok_or_else(|| CoreError::not_found("no download URL for item"))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let url = self.get_file_url(item).await?;
        let header = self.auth_header("GET", &url)?;
        let mut headers = vec![("Authorization".to_string(), header)];
        if let Some((start, size)) = range.clamp(u64::MAX) {
            if !(range.is_full() && start == 0) {
                headers.push(("Range".to_string(), format!("bytes={start}-{}", start + size - 1)));
            }
        }
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Get, &url, &headers, &[], None, true).await?;
        ensure_success(&response)?;
        sink.progress(Some(response.body.len() as u64), response.body.len() as u64);
        sink.received_data(&response.body)
    }

    async fn upload_file(
        &self,
        parent: &Item,
        filename: &str,
        source: &mut (dyn UploadSource + '_),
    ) -> Result<Item, CoreError> {
        self.require_read_write("upload_file")?;
        let mut content = Vec::new();
        let mut buf = vec![0u8; 256 * 1024];
        loop {
            let read = source.put_data(&mut buf, content.len() as u64)?;
            if read == 0 {
                break;
            }
            content.extend_from_slice(&buf[..read]);
        }
        let url = format!("{API_URL}/{}/children?name={filename}", parent.id.as_str());
        let header = self.auth_header("POST", &url)?;
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Post,
            &url,
            &[
                ("Authorization".to_string(), header),
                ("Content-Type".to_string(), "application/octet-stream".to_string()),
            ],
            &[],
            Some(content),
            true,
        )
        .await?;
        ensure_success(&response)?;
        to_item(crate::common::parse_json(&response)?)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let url = format!("{API_URL}/{}/createSubdir?name={name}", parent.id.as_str());
        let header = self.auth_header("POST", &url)?;
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Post,
            &url,
            &[("Authorization".to_string(), header)],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        to_item(crate::common::parse_json(&response)?)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let url = format!("{API_URL}/{}", item.id.as_str());
        let header = self.auth_header("DELETE", &url)?;
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Delete,
            &url,
            &[("Authorization".to_string(), header)],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)
    }

    async fn move_item(&self, _item: &Item, _new_parent: &Item) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("move_item"))
    }

    async fn rename(&self, _item: &Item, _new_name: &str) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("rename"))
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        Ok(GeneralData { username: String::new(), space_used: 0, space_total: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhub_http::testing::{MockHttpEngine, MockResponse};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn hints() -> Hints {
        let mut hints = HashMap::new();
        hints.insert("client_id".to_string(), "key".to_string());
        hints.insert("client_secret".to_string(), "secret".to_string());
        hints.insert("redirect_uri".to_string(), "http://127.0.0.1:12345/4shared".to_string());
        hints
    }

    fn provider(engine: MockHttpEngine) -> FourSharedProvider {
        FourSharedProvider::new(InitData {
            token: Token::new("access-secret", "access-tok", 0),
            hints: hints(),
            permission: Permission::ReadWrite,
            callback: None,
            http: Arc::new(engine),
            thread_pool: Arc::new(cloudhub_runtime::ThreadPool::new(1)),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lists_children_via_oauth1_signed_request() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"files":[{"id":"1","name":"a.txt","size":5,"isFolder":false}]}"#,
        )]));

        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].filename, "a.txt");
        assert!(page.is_last_page());
    }

    #[tokio::test]
    async fn second_page_token_short_circuits_without_a_request() {
        let provider = provider(MockHttpEngine::new(Vec::new()));
        let page = provider
            .list_directory_page(&provider.root_directory(), "cursor")
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }
}
