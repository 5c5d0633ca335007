//! Dropbox adapter (SPEC_FULL.md §4.5 "Dropbox").
//!
//! JSON POST arguments for metadata calls; content calls (download/upload)
//! ship the same arguments JSON-encoded in the `Dropbox-API-Arg` header
//! instead of the body, per Dropbox's content-vs-RPC API split.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use serde::Deserialize;

use crate::common::{
    authorized_request, ensure_success, parse_json, InitData, PendingVerifier, ProviderContext,
    DEFAULT_REAUTH_CODES,
};

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

#[derive(Debug, Deserialize)]
struct DropboxEntry {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "server_modified")]
    server_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<DropboxEntry>,
    #[serde(default)]
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SpaceUsage {
    used: u64,
    allocation: SpaceAllocation,
}

#[derive(Debug, Deserialize)]
struct SpaceAllocation {
    #[serde(default)]
    allocated: u64,
}

#[derive(Debug, Deserialize)]
struct CurrentAccount {
    name: AccountName,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: String,
}

fn entry_id(entry: &DropboxEntry) -> String {
    entry
        .id
        .clone()
        .or_else(|| entry.path_lower.clone())
        .or_else(|| entry.path_display.clone())
        .unwrap_or_else(|| entry.name.clone())
}

fn to_item(entry: DropboxEntry) -> Result<Item, CoreError> {
    let item_type = if entry.tag == "folder" {
        ItemType::Directory
    } else {
        ItemType::from_filename(&entry.name)
    };
    Ok(Item {
        id: ItemId::new(entry_id(&entry))?,
        filename: entry.name.clone(),
        size: entry.size.into(),
        timestamp: entry.server_modified.into(),
        item_type,
        url: None,
        thumbnail_url: None,
    })
}

pub struct DropboxProvider {
    ctx: ProviderContext,
    root: Item,
    pending_verifier: PendingVerifier,
}

impl DropboxProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let hints = init.hints.clone();
        let (auth, _flow) = crate::common::oauth2_auth(
            init.token.clone(),
            hints.get("client_id").cloned().unwrap_or_default(),
            hints.get("client_secret").cloned(),
            AUTH_URL.to_string(),
            TOKEN_URL.to_string(),
            hints.get("redirect_uri").cloned().unwrap_or_default(),
            Vec::new(),
            init.callback.clone(),
        )?;
        Ok(Self {
            ctx: ProviderContext::new(init, auth),
            root: Item::directory(ItemId::new("/")?, ""),
            pending_verifier: PendingVerifier::new(),
        })
    }

    fn flow(&self) -> Result<cloudhub_oauth::PkceFlow, CoreError> {
        let config = cloudhub_oauth::PkceConfig {
            client_id: self.ctx.hints.get("client_id").cloned().unwrap_or_default(),
            client_secret: self.ctx.hints.get("client_secret").cloned(),
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            redirect_uri: self.ctx.hints.get("redirect_uri").cloned().unwrap_or_default(),
            scopes: Vec::new(),
        };
        cloudhub_oauth::PkceFlow::new(&config)
    }

    async fn rpc(&self, path: &str, args: serde_json::Value) -> Result<crate::common::RawResponse, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}{path}"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&args).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        Ok(response)
    }
}

#[async_trait]
impl CloudProvider for DropboxProvider {
    fn name(&self) -> &str {
        "dropbox"
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
        match self.flow() {
            Ok(flow) => {
                let (url, _csrf, verifier) = flow.generate_auth_url();
                self.pending_verifier.store(verifier);
                url
            }
            Err(_) => String::new(),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<Token, CoreError> {
        self.flow()?
            .exchange_code(code.to_string(), self.pending_verifier.take())
            .await
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        self.ctx.auth.reauthorize().await
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        let response = if page_token.is_empty() {
            self.rpc(
                "/files/list_folder",
                serde_json::json!({ "path": if dir.id.as_str() == "/" { "" } else { dir.id.as_str() } }),
            )
            .await?
        } else {
            self.rpc(
                "/files/list_folder/continue",
                serde_json::json!({ "cursor": page_token }),
            )
            .await?
        };
        let result: ListFolderResult = parse_json(&response)?;
        Ok(ListPage {
            items: result.entries.into_iter().map(to_item).collect::<Result<_, _>>()?,
            next_token: if result.has_more { result.cursor } else { String::new() },
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let response = self
            .rpc("/files/get_metadata", serde_json::json!({ "path": id.as_str() }))
            .await?;
        to_item(parse_json(&response)?)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        let response = self
            .rpc(
                "/sharing/create_shared_link_with_settings",
                serde_json::json!({ "path": item.id.as_str() }),
            )
            .await;
        match response {
            Ok(response) => {
                let value: serde_json::Value = parse_json(&response)?;
                value
                    .get("url")
                    .and_then(|u| u.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::not_found("no shared link returned"))
            }
            Err(e) => Err(e),
        }
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let args = serde_json::json!({ "path": item.id.as_str() });
        let mut headers = vec![(
            "Dropbox-API-Arg".to_string(),
            args.to_string(),
        )];
        if let Some((start, size)) = range.clamp(u64::MAX) {
            if !(range.is_full() && start == 0) {
                headers.push(("Range".to_string(), format!("bytes={start}-{}", start + size - 1)));
            }
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{CONTENT_URL}/files/download"),
            &headers,
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
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
        let parent_path = if parent.id.as_str() == "/" { "" } else { parent.id.as_str() };
        let args = serde_json::json!({
            "path": format!("{parent_path}/{filename}"),
            "mode": "add",
            "autorename": true,
        });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{CONTENT_URL}/files/upload"),
            &[
                ("Dropbox-API-Arg".to_string(), args.to_string()),
                ("Content-Type".to_string(), "application/octet-stream".to_string()),
            ],
            &[],
            Some(content),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        to_item(parse_json(&response)?)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let parent_path = if parent.id.as_str() == "/" { "" } else { parent.id.as_str() };
        let response = self
            .rpc(
                "/files/create_folder_v2",
                serde_json::json!({ "path": format!("{parent_path}/{name}") }),
            )
            .await?;
        let value: serde_json::Value = parse_json(&response)?;
        let metadata: DropboxEntry = serde_json::from_value(
            value
                .get("metadata")
                .cloned()
                .ok_or_else(|| CoreError::parse("missing metadata in create_folder_v2 response"))?,
        )
        .map_err(|e| CoreError::parse(e.to_string()))?;
        to_item(metadata)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        self.rpc("/files/delete_v2", serde_json::json!({ "path": item.id.as_str() }))
            .await?;
        Ok(())
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let parent_path = if new_parent.id.as_str() == "/" { "" } else { new_parent.id.as_str() };
        let response = self
            .rpc(
                "/files/move_v2",
                serde_json::json!({
                    "from_path": item.id.as_str(),
                    "to_path": format!("{parent_path}/{}", item.filename),
                }),
            )
            .await?;
        let value: serde_json::Value = parse_json(&response)?;
        let metadata: DropboxEntry = serde_json::from_value(
            value
                .get("metadata")
                .cloned()
                .ok_or_else(|| CoreError::parse("missing metadata in move_v2 response"))?,
        )
        .map_err(|e| CoreError::parse(e.to_string()))?;
        to_item(metadata)
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let parent_path = item
            .id
            .as_str()
            .rsplit_once('/')
            .map(|(p, _)| p)
            .unwrap_or("");
        let response = self
            .rpc(
                "/files/move_v2",
                serde_json::json!({
                    "from_path": item.id.as_str(),
                    "to_path": format!("{parent_path}/{new_name}"),
                }),
            )
            .await?;
        let value: serde_json::Value = parse_json(&response)?;
        let metadata: DropboxEntry = serde_json::from_value(
            value
                .get("metadata")
                .cloned()
                .ok_or_else(|| CoreError::parse("missing metadata in move_v2 response"))?,
        )
        .map_err(|e| CoreError::parse(e.to_string()))?;
        to_item(metadata)
    }

    async fn get_thumbnail(&self, item: &Item) -> Result<Vec<u8>, CoreError> {
        let args = serde_json::json!({
            "resource": { ".tag": "path", "path": item.id.as_str() },
            "format": "jpeg",
            "size": "w64h64",
        });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{CONTENT_URL}/files/get_thumbnail_v2"),
            &[("Dropbox-API-Arg".to_string(), args.to_string())],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        if response.status == 409 {
            return Err(CoreError::unimplemented("get_thumbnail"));
        }
        ensure_success(&response)?;
        Ok(response.body)
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let usage = self.rpc("/users/get_space_usage", serde_json::json!({})).await?;
        let usage: SpaceUsage = parse_json(&usage)?;
        let account = self.rpc("/users/get_current_account", serde_json::json!(null)).await?;
        let account: CurrentAccount = parse_json(&account)?;
        Ok(GeneralData {
            username: account.name.display_name,
            space_used: usage.used,
            space_total: usage.allocation.allocated,
        })
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
        hints.insert("client_id".to_string(), "id".to_string());
        hints.insert("redirect_uri".to_string(), "http://127.0.0.1:12345/dropbox".to_string());
        hints
    }

    fn provider(engine: MockHttpEngine) -> DropboxProvider {
        DropboxProvider::new(InitData {
            token: Token::new("r", "a", 3600),
            hints: hints(),
            permission: Permission::ReadWrite,
            callback: None,
            http: Arc::new(engine),
            thread_pool: Arc::new(cloudhub_runtime::ThreadPool::new(1)),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lists_a_folder_and_reports_no_cursor_when_done() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"entries":[{".tag":"file","name":"a.txt","id":"id:1","size":5}],"cursor":"c1","has_more":false}"#,
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
    async fn entry_id_falls_back_to_path_display_when_id_and_path_lower_are_absent() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"entries":[{"path_display":"/a","name":"a",".tag":"file","size":3}],"has_more":false}"#,
        )]));
        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.items[0].id.as_str(), "/a");
    }

    #[tokio::test]
    async fn list_directory_page_keeps_cursor_when_more_remain() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"entries":[],"cursor":"c2","has_more":true}"#,
        )]));
        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.next_token, "c2");
    }

    #[tokio::test]
    async fn general_data_combines_usage_and_account_calls() {
        let provider = provider(MockHttpEngine::new(vec![
            MockResponse::json(200, r#"{"used":40,"allocation":{"allocated":100}}"#),
            MockResponse::json(200, r#"{"name":{"display_name":"Ada"}}"#),
        ]));
        let data = provider.general_data().await.unwrap();
        assert_eq!(data.username, "Ada");
        assert_eq!(data.space_used, 40);
        assert_eq!(data.space_total, 100);
    }
}
