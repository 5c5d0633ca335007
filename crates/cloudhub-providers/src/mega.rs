//! Mega adapter (SPEC_FULL.md §4.5 "Mega").
//!
//! Mega's wire protocol encrypts both file attributes (names) and content
//! with per-node AES keys derived from the account's master key, which is
//! itself wrapped in the login response. Deriving and unwrapping those keys
//! is out of scope for this adapter's sparse coverage (SPEC_FULL.md §9 Open
//! Questions): sessions are established out of band and handed to this
//! adapter as an already-authenticated session id, and node names are left
//! as their undecrypted handle since this adapter never obtains a node key.
//! Content operations (`download_file`, `upload_file`, `get_file_url`,
//! `get_thumbnail`) and all mutations report [`CoreError::unimplemented`].

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use cloudhub_oauth::{Auth, Refresher};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::common::{ensure_success, execute, parse_json, InitData, ProviderContext};

const API_URL: &str = "https://g.api.mega.co.nz/cs";
const ROOT_HANDLE: &str = "root";

#[derive(Debug, Deserialize)]
struct MegaNode {
    /// Node handle, the only stable identifier this adapter can read
    /// without the account's master key.
    h: String,
    /// Parent handle; absent only for the three root-level nodes
    /// (cloud drive, inbox, rubbish bin).
    #[serde(default)]
    p: Option<String>,
    /// Node type: 0 = file, 1 = folder, 2/3/4 = cloud/inbox/rubbish roots.
    t: i32,
    /// File size in bytes, present only for files.
    #[serde(default)]
    s: Option<u64>,
    /// Last modification time, Unix seconds.
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    f: Vec<MegaNode>,
}

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    /// Total storage quota, bytes.
    #[serde(default)]
    mstrg: Option<u64>,
    /// Storage used, bytes.
    #[serde(default)]
    cstrg: Option<u64>,
}

fn is_directory(node_type: i32) -> bool {
    node_type != 0
}

fn to_item(node: &MegaNode) -> Result<Item, CoreError> {
    let item_type = if is_directory(node.t) { ItemType::Directory } else { ItemType::Unknown };
    let timestamp = node
        .ts
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0));
    Ok(Item {
        id: ItemId::new(node.h.clone())?,
        filename: node.h.clone(),
        size: node.s.into(),
        timestamp: timestamp.into(),
        item_type,
        url: None,
        thumbnail_url: None,
    })
}

struct NeverRefresh;

#[async_trait]
impl Refresher for NeverRefresh {
    async fn refresh(&self, current: &Token) -> Result<Token, CoreError> {
        Ok(current.clone())
    }
}

pub struct MegaProvider {
    ctx: ProviderContext,
    session_id: String,
    root: Item,
}

impl MegaProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let session_id = init.token.refresh_token.clone();
        let auth = Arc::new(Auth::new(init.token.clone(), Arc::new(NeverRefresh)));
        Ok(Self {
            ctx: ProviderContext::new(init, auth),
            session_id,
            root: Item::directory(ItemId::new(ROOT_HANDLE)?, ""),
        })
    }

    async fn request(&self, body: serde_json::Value) -> Result<serde_json::Value, CoreError> {
        let url = format!("{API_URL}?id=1&sid={}", self.session_id);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Post,
            &url,
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&json!([body])).map_err(|e| CoreError::parse(e.to_string()))?),
            true,
        )
        .await?;
        ensure_success(&response)?;
        let mut results: Vec<serde_json::Value> = parse_json(&response)?;
        results.pop().ok_or_else(|| CoreError::parse("empty Mega response array"))
    }

    async fn fetch_filesystem(&self) -> Result<Vec<MegaNode>, CoreError> {
        let value = self.request(json!({ "a": "f", "c": 1 })).await?;
        let parsed: FilesResponse = serde_json::from_value(value).map_err(|e| CoreError::parse(e.to_string()))?;
        Ok(parsed.f)
    }
}

#[async_trait]
impl CloudProvider for MegaProvider {
    fn name(&self) -> &str {
        "mega"
    }

    fn root_directory(&self) -> Item {
        self.root.clone()
    }

    fn permission(&self) -> Permission {
        Permission::ReadOnly
    }

    fn hints(&self) -> &Hints {
        &self.ctx.hints
    }

    fn token(&self) -> Token {
        self.ctx.auth.token_snapshot()
    }

    fn authorize_library_url(&self) -> String {
        String::new()
    }

    async fn exchange_code(&self, code: &str) -> Result<Token, CoreError> {
        Ok(Token::non_oauth(code.to_string()))
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        Ok(self.token())
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        if !page_token.is_empty() {
            return Ok(ListPage { items: Vec::new(), next_token: String::new() });
        }
        let nodes = self.fetch_filesystem().await?;
        let parent_handle = if dir.id.as_str() == ROOT_HANDLE { None } else { Some(dir.id.as_str()) };
        let items = nodes
            .iter()
            .filter(|n| match parent_handle {
                Some(handle) => n.p.as_deref() == Some(handle),
                None => matches!(n.t, 2 | 3 | 4) || n.p.is_none(),
            })
            .map(to_item)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListPage { items, next_token: String::new() })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let nodes = self.fetch_filesystem().await?;
        nodes
            .iter()
            .find(|n| n.h == id.as_str())
            .ok_or_else(|| CoreError::not_found(id.as_str()))
            .and_then(to_item)
    }

    async fn get_file_url(&self, _item: &Item) -> Result<String, CoreError> {
        Err(CoreError::unimplemented("get_file_url (requires per-node key decryption)"))
    }

    async fn download_file(
        &self,
        _item: &Item,
        _range: Range,
        _sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        Err(CoreError::unimplemented("download_file (requires per-node key decryption)"))
    }

    async fn upload_file(
        &self,
        _parent: &Item,
        _filename: &str,
        _source: &mut (dyn UploadSource + '_),
    ) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("upload_file (requires per-node key derivation)"))
    }

    async fn mkdir(&self, _parent: &Item, _name: &str) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("mkdir (requires per-node key derivation)"))
    }

    async fn delete(&self, _item: &Item) -> Result<(), CoreError> {
        Err(CoreError::unimplemented("delete"))
    }

    async fn move_item(&self, _item: &Item, _new_parent: &Item) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("move_item"))
    }

    async fn rename(&self, _item: &Item, _new_name: &str) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("rename (requires re-encrypting node attributes)"))
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let value = self.request(json!({ "a": "uq", "strg": 1 })).await?;
        let quota: QuotaResponse = serde_json::from_value(value).map_err(|e| CoreError::parse(e.to_string()))?;
        Ok(GeneralData {
            username: String::new(),
            space_used: quota.cstrg.unwrap_or(0),
            space_total: quota.mstrg.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_and_root_types_are_classified_as_directories() {
        assert!(is_directory(1));
        assert!(is_directory(2));
        assert!(!is_directory(0));
    }

    #[test]
    fn node_without_size_converts_to_an_item_with_unknown_size() {
        let node = MegaNode { h: "abc123".to_string(), p: Some("parent1".to_string()), t: 0, s: None, ts: None };
        let item = to_item(&node).unwrap();
        assert_eq!(item.filename, "abc123");
        assert!(item.size.known().is_none());
    }
}
