//! Box adapter (SPEC_FULL.md §4.5 "Box").
//!
//! Uploads ship a multipart body with an `attributes` JSON part followed by
//! the file part, mirroring Box's own multipart-upload documentation rather
//! than any single reference adapter. Listing uses Box's offset/limit paging
//! instead of an opaque cursor.

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

const API_URL: &str = "https://api.box.com/2.0";
const UPLOAD_URL: &str = "https://upload.box.com/api/2.0/files";
const AUTH_URL: &str = "https://account.box.com/api/oauth2/authorize";
const TOKEN_URL: &str = "https://api.box.com/oauth2/token";
const PAGE_LIMIT: u32 = 200;
const BOUNDARY: &str = "cloudhub_box_boundary_9c1e";

#[derive(Debug, Deserialize)]
struct BoxEntry {
    id: String,
    name: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "modified_at")]
    modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    item_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoxEntries {
    entries: Vec<BoxEntry>,
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    limit: u64,
}

#[derive(Debug, Deserialize)]
struct BoxUploadResult {
    entries: Vec<BoxEntry>,
}

#[derive(Debug, Deserialize)]
struct BoxUser {
    name: String,
    space_amount: u64,
    space_used: u64,
}

fn to_item(entry: BoxEntry) -> Result<Item, CoreError> {
    let item_type = if entry.entry_type == "folder" {
        ItemType::Directory
    } else {
        ItemType::from_filename(&entry.name)
    };
    Ok(Item {
        id: ItemId::new(entry.id)?,
        filename: entry.name,
        size: entry.size.into(),
        timestamp: entry.modified_at.into(),
        item_type,
        url: None,
        thumbnail_url: None,
    })
}

pub struct BoxProvider {
    ctx: ProviderContext,
    root: Item,
    pending_verifier: PendingVerifier,
}

impl BoxProvider {
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
            root: Item::directory(ItemId::new("0")?, ""),
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
}

#[async_trait]
impl CloudProvider for BoxProvider {
    fn name(&self) -> &str {
        "box"
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
        let offset: u64 = page_token.parse().unwrap_or(0);
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/folders/{}/items", dir.id.as_str()),
            &[],
            &[
                ("limit".to_string(), PAGE_LIMIT.to_string()),
                ("offset".to_string(), offset.to_string()),
                ("fields".to_string(), "name,size,modified_at,item_status".to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: BoxEntries = parse_json(&response)?;
        let next_offset = page.offset + page.limit;
        let next_token = if next_offset < page.total_count {
            next_offset.to_string()
        } else {
            String::new()
        };
        Ok(ListPage {
            items: page
                .entries
                .into_iter()
                .filter(|e| e.item_status.as_deref() != Some("trashed"))
                .map(to_item)
                .collect::<Result<_, _>>()?,
            next_token,
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        for kind in ["folders", "files"] {
            let response = authorized_request(
                &self.ctx,
                HttpMethod::Get,
                &format!("{API_URL}/{kind}/{}", id.as_str()),
                &[],
                &[],
                None,
                DEFAULT_REAUTH_CODES,
            )
            .await?;
            if response.status == 404 {
                continue;
            }
            ensure_success(&response)?;
            return to_item(parse_json(&response)?);
        }
        Err(CoreError::not_found(id.as_str()))
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        Ok(format!("https://app.box.com/file/{}", item.id.as_str()))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let mut headers = Vec::new();
        if let Some((start, size)) = range.clamp(u64::MAX) {
            if !(range.is_full() && start == 0) {
                headers.push(("Range".to_string(), format!("bytes={start}-{}", start + size - 1)));
            }
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/files/{}/content", item.id.as_str()),
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
        let attributes = serde_json::json!({
            "name": filename,
            "parent": { "id": parent.id.as_str() },
        });
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"attributes\"\r\n\r\n");
        body.extend_from_slice(attributes.to_string().as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(&content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{UPLOAD_URL}/content"),
            &[(
                "Content-Type".to_string(),
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )],
            &[],
            Some(body),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let result: BoxUploadResult = parse_json(&response)?;
        let entry = result
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::parse("empty upload response"))?;
        to_item(entry)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let body = serde_json::json!({
            "name": name,
            "parent": { "id": parent.id.as_str() },
        });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}/folders"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        to_item(parse_json(&response)?)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let kind = if item.item_type == ItemType::Directory { "folders" } else { "files" };
        let query: &[(String, String)] = if kind == "folders" {
            &[("recursive".to_string(), "true".to_string())]
        } else {
            &[]
        };
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Delete,
            &format!("{API_URL}/{kind}/{}", item.id.as_str()),
            &[],
            query,
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let kind = if item.item_type == ItemType::Directory { "folders" } else { "files" };
        let body = serde_json::json!({ "parent": { "id": new_parent.id.as_str() } });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Put,
            &format!("{API_URL}/{kind}/{}", item.id.as_str()),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        to_item(parse_json(&response)?)
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let kind = if item.item_type == ItemType::Directory { "folders" } else { "files" };
        let body = serde_json::json!({ "name": new_name });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Put,
            &format!("{API_URL}/{kind}/{}", item.id.as_str()),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        to_item(parse_json(&response)?)
    }

    async fn get_thumbnail(&self, item: &Item) -> Result<Vec<u8>, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/files/{}/thumbnail.png", item.id.as_str()),
            &[],
            &[("min_height".to_string(), "64".to_string()), ("min_width".to_string(), "64".to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        if response.status == 404 || response.status == 202 {
            return Err(CoreError::unimplemented("get_thumbnail"));
        }
        ensure_success(&response)?;
        Ok(response.body)
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/users/me"),
            &[],
            &[("fields".to_string(), "name,space_amount,space_used".to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let user: BoxUser = parse_json(&response)?;
        Ok(GeneralData {
            username: user.name,
            space_used: user.space_used,
            space_total: user.space_amount,
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
        hints.insert("redirect_uri".to_string(), "http://127.0.0.1:12345/box".to_string());
        hints
    }

    fn provider(engine: MockHttpEngine) -> BoxProvider {
        BoxProvider::new(InitData {
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
    async fn lists_a_page_and_filters_trashed_items() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"entries":[
                {"id":"1","name":"a.txt","type":"file","size":5,"item_status":"active"},
                {"id":"2","name":"gone.txt","type":"file","item_status":"trashed"}
            ],"total_count":2,"offset":0,"limit":200}"#,
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
    async fn list_directory_page_computes_next_offset_when_more_remain() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"entries":[],"total_count":500,"offset":0,"limit":200}"#,
        )]));
        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.next_token, "200");
    }

    #[tokio::test]
    async fn general_data_reads_space_usage() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"name":"Ada","space_amount":1000,"space_used":250}"#,
        )]));
        let data = provider.general_data().await.unwrap();
        assert_eq!(data.username, "Ada");
        assert_eq!(data.space_used, 250);
        assert_eq!(data.space_total, 1000);
    }
}
