//! Microsoft Graph / OneDrive adapter (SPEC_FULL.md §4.5 "OneDrive").
//!
//! Grounded on the reference adapter's `GraphClient`/`GraphCloudProvider`:
//! same `/me/drive` base, the same metadata-to-`Item` mapping shape
//! (`GraphMetadataItem`/`GraphFileFacet`), and the same resumable-upload
//! session pattern (`createUploadSession` then `PUT` with `Content-Range`),
//! generalized off the Graph SDK types onto the crate's own `Item`/`CoreError`
//! vocabulary and the pluggable [`cloudhub_http::HttpEngine`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, MaybeKnown, Permission, Range,
    Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use serde::{Deserialize, Serialize};

use crate::common::{
    authorized_request, ensure_success, parse_json, InitData, PendingVerifier, ProviderContext,
    DEFAULT_REAUTH_CODES,
};

const BASE_URL: &str = "https://graph.microsoft.com/v1.0/me/drive";
const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

#[derive(Debug, Deserialize)]
struct GraphFileFacet {
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphHashes {}

#[derive(Debug, Deserialize)]
struct GraphMetadataItem {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "lastModifiedDateTime")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(default, rename = "webUrl")]
    web_url: Option<String>,
    #[serde(default)]
    file: Option<GraphFileFacet>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(default, rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphChildrenPage {
    value: Vec<GraphMetadataItem>,
    #[serde(default, rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphDrive {
    #[serde(default)]
    owner: Option<GraphOwner>,
    quota: GraphQuota,
}

#[derive(Debug, Deserialize)]
struct GraphOwner {
    #[serde(default)]
    user: Option<GraphUser>,
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQuota {
    total: u64,
    used: u64,
}

#[derive(Debug, Serialize)]
struct CreateUploadSessionBody {
    item: UploadSessionItem,
}

#[derive(Debug, Serialize)]
struct UploadSessionItem {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    conflict_behavior: &'static str,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

fn metadata_to_item(item: GraphMetadataItem) -> Result<Item, CoreError> {
    let item_type = if item.folder.is_some() {
        ItemType::Directory
    } else {
        item.file
            .as_ref()
            .and_then(|f| f.mime_type.as_deref())
            .map(|_| ItemType::from_filename(&item.name))
            .unwrap_or_else(|| ItemType::from_filename(&item.name))
    };
    // A minimal upload-confirmation response carries no `id`; the item's own
    // path (its name, under the parent we just wrote it to) is the best
    // available identifier until a follow-up `get_item_data` call refreshes it.
    let id = item.id.clone().unwrap_or_else(|| item.name.clone());
    Ok(Item {
        id: ItemId::new(id)?,
        filename: item.name,
        size: item.size.into(),
        timestamp: item.last_modified.into(),
        item_type,
        url: item.web_url.or(item.download_url),
        thumbnail_url: None,
    })
}

pub struct OneDriveProvider {
    ctx: ProviderContext,
    root: Item,
    pending_verifier: PendingVerifier,
}

impl OneDriveProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let hints = init.hints.clone();
        let (auth, _flow) = crate::common::oauth2_auth(
            init.token.clone(),
            hints.get("client_id").cloned().unwrap_or_default(),
            hints.get("client_secret").cloned(),
            AUTH_URL.to_string(),
            TOKEN_URL.to_string(),
            hints.get("redirect_uri").cloned().unwrap_or_default(),
            vec!["offline_access".into(), "files.readwrite".into()],
            init.callback.clone(),
        )?;
        let ctx = ProviderContext::new(init, auth);
        Ok(Self {
            ctx,
            root: Item::directory(ItemId::new("root")?, ""),
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
            scopes: vec!["offline_access".into(), "files.readwrite".into()],
        };
        cloudhub_oauth::PkceFlow::new(&config)
    }

    fn item_url(&self, id: &ItemId) -> String {
        if id.as_str() == "root" {
            format!("{BASE_URL}/root")
        } else {
            format!("{BASE_URL}/items/{}", id.as_str())
        }
    }
}

#[async_trait]
impl CloudProvider for OneDriveProvider {
    fn name(&self) -> &str {
        "onedrive"
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
        let flow = self.flow()?;
        flow.exchange_code(code.to_string(), self.pending_verifier.take())
            .await
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        self.ctx.auth.reauthorize().await
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        let url = if !page_token.is_empty() {
            page_token.to_string()
        } else {
            format!("{}/children?$top=200", self.item_url(&dir.id))
        };
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &url,
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: GraphChildrenPage = parse_json(&response)?;
        let items = page
            .value
            .into_iter()
            .map(metadata_to_item)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListPage {
            items,
            next_token: page.next_link.unwrap_or_default(),
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &self.item_url(id),
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        metadata_to_item(parse_json(&response)?)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        if let Some(url) = &item.url {
            return Ok(url.clone());
        }
        let fetched = self.get_item_data(&item.id).await?;
        fetched
            .url
            .ok_or_else(|| CoreError::not_found("no download URL for item"))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let url = format!("{}/content", self.item_url(&item.id));
        let mut headers = Vec::new();
        if let Some((start, size)) = range.clamp(u64::MAX) {
            if !(range.is_full() && start == 0) {
                headers.push(("Range".to_string(), format!("bytes={start}-{}", start + size - 1)));
            }
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &url,
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
        let session_url = format!(
            "{}:/{}:/createUploadSession",
            self.item_url(&parent.id),
            filename
        );
        let body = serde_json::to_vec(&CreateUploadSessionBody {
            item: UploadSessionItem {
                conflict_behavior: "rename",
                name: filename.to_string(),
            },
        })
        .map_err(|e| CoreError::parse(e.to_string()))?;
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &session_url,
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(body),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let session: UploadSession = parse_json(&response)?;

        let mut bytes = Vec::new();
        let mut buf = vec![0u8; 256 * 1024];
        loop {
            let read = source.put_data(&mut buf, bytes.len() as u64)?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..read]);
        }
        let total = bytes.len() as u64;
        let content_range = if total == 0 {
            "bytes 0-0/0".to_string()
        } else {
            format!("bytes 0-{}/{total}", total - 1)
        };
        let response = crate::common::execute(
            self.ctx.http.as_ref(),
            HttpMethod::Put,
            &session.upload_url,
            &[("Content-Range".to_string(), content_range)],
            &[],
            Some(bytes),
            true,
        )
        .await?;
        ensure_success(&response)?;
        metadata_to_item(parse_json(&response)?)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{}/children", self.item_url(&parent.id)),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        metadata_to_item(parse_json(&response)?)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Delete,
            &self.item_url(&item.id),
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let body = serde_json::json!({ "parentReference": { "id": new_parent.id.as_str() } });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Patch,
            &self.item_url(&item.id),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        metadata_to_item(parse_json(&response)?)
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let body = serde_json::json!({ "name": new_name });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Patch,
            &self.item_url(&item.id),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        metadata_to_item(parse_json(&response)?)
    }

    async fn get_thumbnail(&self, item: &Item) -> Result<Vec<u8>, CoreError> {
        let url = format!("{}/thumbnails/0/small/content", self.item_url(&item.id));
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &url,
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        if response.status == 404 {
            return Err(CoreError::unimplemented("get_thumbnail"));
        }
        ensure_success(&response)?;
        Ok(response.body)
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            BASE_URL,
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let drive: GraphDrive = parse_json(&response)?;
        Ok(GeneralData {
            username: drive
                .owner
                .and_then(|o| o.user)
                .and_then(|u| u.display_name)
                .unwrap_or_default(),
            space_used: drive.quota.used,
            space_total: drive.quota.total,
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
        hints.insert("redirect_uri".to_string(), "http://127.0.0.1:12345/onedrive".to_string());
        hints
    }

    fn provider(engine: MockHttpEngine) -> OneDriveProvider {
        OneDriveProvider::new(InitData {
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
    async fn lists_children_and_follows_next_link() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"value":[{"id":"1","name":"a.txt","size":5,"file":{}}],"@odata.nextLink":"https://graph.microsoft.com/v1.0/me/drive/root/children?$skip=200"}"#,
        )]));

        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].filename, "a.txt");
        assert!(!page.is_last_page());
        assert_eq!(
            page.next_token,
            "https://graph.microsoft.com/v1.0/me/drive/root/children?$skip=200"
        );
    }

    #[tokio::test]
    async fn general_data_reads_quota_and_owner_name() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"owner":{"user":{"displayName":"Ada"}},"quota":{"total":100,"used":40}}"#,
        )]));

        let data = provider.general_data().await.unwrap();
        assert_eq!(data.username, "Ada");
        assert_eq!(data.space_used, 40);
        assert_eq!(data.space_total, 100);
    }

    struct BytesSource(Vec<u8>);

    impl UploadSource for BytesSource {
        fn size(&self) -> Option<u64> {
            Some(self.0.len() as u64)
        }

        fn put_data(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            let offset = offset as usize;
            if offset >= self.0.len() {
                return Ok(0);
            }
            let n = (self.0.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }
    }

    #[tokio::test]
    async fn upload_file_tolerates_a_minimal_confirmation_response_with_no_id() {
        let provider = provider(MockHttpEngine::new(vec![
            MockResponse::json(200, r#"{"uploadUrl":"https://upload.example/session"}"#),
            MockResponse::json(200, r#"{"name":"f"}"#),
        ]));
        let root = provider.root_directory();
        let mut source = BytesSource(vec![0u8; 7]);

        let item = provider.upload_file(&root, "f", &mut source).await.unwrap();
        assert_eq!(item.filename, "f");
        assert_eq!(item.id.as_str(), "f");
    }

    #[tokio::test]
    async fn get_thumbnail_maps_404_to_unimplemented() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::empty(404)]));
        let item = Item::directory(ItemId::new("root").unwrap(), "");
        let err = provider.get_thumbnail(&item).await.unwrap_err();
        assert!(err.is_kind(cloudhub_core::domain::ErrorKind::Unimplemented));
    }
}
