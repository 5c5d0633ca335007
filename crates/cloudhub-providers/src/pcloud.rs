//! pCloud adapter (SPEC_FULL.md §4.5 "pCloud").
//!
//! Sparse coverage per SPEC_FULL.md §9: pCloud's API returns `result` status
//! codes rather than HTTP status codes for most errors, so every call here
//! checks the decoded `result` field in addition to [`ensure_success`].

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use serde::Deserialize;

use crate::common::{authorized_request, ensure_success, execute, parse_json, InitData, PendingVerifier, ProviderContext, DEFAULT_REAUTH_CODES};

const API_URL: &str = "https://api.pcloud.com";
const AUTH_URL: &str = "https://my.pcloud.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.pcloud.com/oauth2_token";

#[derive(Debug, Deserialize)]
struct PCloudMetadata {
    name: String,
    #[serde(default)]
    folderid: Option<u64>,
    #[serde(default)]
    fileid: Option<u64>,
    isfolder: bool,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    contents: Option<Vec<PCloudMetadata>>,
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    result: i32,
    #[serde(default)]
    metadata: Option<PCloudMetadata>,
}

#[derive(Debug, Deserialize)]
struct SimpleResponse {
    result: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    result: i32,
    #[serde(default)]
    metadata: Vec<PCloudMetadata>,
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    result: i32,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    result: i32,
    #[serde(default)]
    email: String,
    quota: u64,
    usedquota: u64,
}

fn item_id(meta: &PCloudMetadata) -> String {
    if meta.isfolder {
        format!("d{}", meta.folderid.unwrap_or(0))
    } else {
        format!("f{}", meta.fileid.unwrap_or(0))
    }
}

fn to_item(meta: PCloudMetadata) -> Result<Item, CoreError> {
    let item_type = if meta.isfolder { ItemType::Directory } else { ItemType::from_filename(&meta.name) };
    let timestamp = meta
        .modified
        .as_deref()
        .and_then(|t| chrono::DateTime::parse_from_rfc2822(t).ok())
        .map(|t| t.with_timezone(&chrono::Utc));
    Ok(Item {
        id: ItemId::new(item_id(&meta))?,
        filename: meta.name,
        size: meta.size.into(),
        timestamp: timestamp.into(),
        item_type,
        url: None,
        thumbnail_url: None,
    })
}

fn check_result(result: i32) -> Result<(), CoreError> {
    if result == 0 {
        Ok(())
    } else {
        Err(CoreError::http(result, format!("pCloud error code {result}")))
    }
}

fn numeric_id(id: &ItemId) -> &str {
    &id.as_str()[1..]
}

pub struct PCloudProvider {
    ctx: ProviderContext,
    pending_verifier: PendingVerifier,
    root: Item,
}

impl PCloudProvider {
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
            pending_verifier: PendingVerifier::new(),
            root: Item::directory(ItemId::new("d0")?, ""),
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
impl CloudProvider for PCloudProvider {
    fn name(&self) -> &str {
        "pcloud"
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
        if !page_token.is_empty() {
            return Ok(ListPage { items: Vec::new(), next_token: String::new() });
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/listfolder"),
            &[],
            &[("folderid".to_string(), numeric_id(&dir.id).to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: ListFolderResponse = parse_json(&response)?;
        check_result(page.result)?;
        let contents = page
            .metadata
            .and_then(|m| m.contents)
            .unwrap_or_default();
        Ok(ListPage {
            items: contents.into_iter().map(to_item).collect::<Result<_, _>>()?,
            next_token: String::new(),
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let (endpoint, param) = if id.as_str().starts_with('d') {
            ("listfolder", "folderid")
        } else {
            ("checksumfile", "fileid")
        };
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/{endpoint}"),
            &[],
            &[(param.to_string(), numeric_id(id).to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: ListFolderResponse = parse_json(&response)?;
        check_result(page.result)?;
        page.metadata.ok_or_else(|| CoreError::not_found(id.as_str())).and_then(to_item)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/getfilelink"),
            &[],
            &[("fileid".to_string(), numeric_id(&item.id).to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let link: LinkResponse = parse_json(&response)?;
        check_result(link.result)?;
        let host = link.hosts.first().ok_or_else(|| CoreError::not_found("no pCloud host returned"))?;
        Ok(format!("https://{host}{}", link.path))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let url = self.get_file_url(item).await?;
        let mut headers = Vec::new();
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
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Put,
            &format!("{API_URL}/uploadfile"),
            &[("Content-Type".to_string(), "application/octet-stream".to_string())],
            &[
                ("folderid".to_string(), numeric_id(&parent.id).to_string()),
                ("filename".to_string(), filename.to_string()),
            ],
            Some(content),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let upload: UploadResponse = parse_json(&response)?;
        check_result(upload.result)?;
        let meta = upload.metadata.into_iter().next().ok_or_else(|| CoreError::parse("empty upload response"))?;
        to_item(meta)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/createfolder"),
            &[],
            &[
                ("folderid".to_string(), numeric_id(&parent.id).to_string()),
                ("name".to_string(), name.to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: ListFolderResponse = parse_json(&response)?;
        check_result(page.result)?;
        page.metadata.ok_or_else(|| CoreError::parse("empty createfolder response")).and_then(to_item)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let (endpoint, param) = if item.id.as_str().starts_with('d') {
            ("deletefolderrecursive", "folderid")
        } else {
            ("deletefile", "fileid")
        };
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/{endpoint}"),
            &[],
            &[(param.to_string(), numeric_id(&item.id).to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let result: SimpleResponse = parse_json(&response)?;
        check_result(result.result)
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let (endpoint, param) = if item.id.as_str().starts_with('d') {
            ("renamefolder", "folderid")
        } else {
            ("renamefile", "fileid")
        };
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/{endpoint}"),
            &[],
            &[
                (param.to_string(), numeric_id(&item.id).to_string()),
                ("tofolderid".to_string(), numeric_id(&new_parent.id).to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: ListFolderResponse = parse_json(&response)?;
        check_result(page.result)?;
        page.metadata.ok_or_else(|| CoreError::parse("empty move response")).and_then(to_item)
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let (endpoint, param) = if item.id.as_str().starts_with('d') {
            ("renamefolder", "folderid")
        } else {
            ("renamefile", "fileid")
        };
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/{endpoint}"),
            &[],
            &[
                (param.to_string(), numeric_id(&item.id).to_string()),
                ("toname".to_string(), new_name.to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: ListFolderResponse = parse_json(&response)?;
        check_result(page.result)?;
        page.metadata.ok_or_else(|| CoreError::parse("empty rename response")).and_then(to_item)
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/userinfo"),
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let info: UserInfo = parse_json(&response)?;
        check_result(info.result)?;
        Ok(GeneralData { username: info.email, space_used: info.usedquota, space_total: info.quota })
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
        hints.insert("redirect_uri".to_string(), "http://127.0.0.1:12345/pcloud".to_string());
        hints
    }

    fn provider(engine: MockHttpEngine) -> PCloudProvider {
        PCloudProvider::new(InitData {
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
    async fn lists_folder_contents_with_disambiguated_ids() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"result":0,"metadata":{"name":"/","isfolder":true,"contents":[
                {"name":"a.txt","isfolder":false,"fileid":7,"size":5},
                {"name":"sub","isfolder":true,"folderid":9}
            ]}}"#,
        )]));

        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id.as_str(), "f7");
        assert_eq!(page.items[1].id.as_str(), "d9");
    }

    #[tokio::test]
    async fn nonzero_result_code_surfaces_as_an_error() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"result":2009,"metadata":null}"#,
        )]));
        let err = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap_err();
        assert!(err.is_kind(cloudhub_core::domain::ErrorKind::Http));
        assert_eq!(err.code, 2009);
    }

    #[tokio::test]
    async fn general_data_reads_quota() {
        let provider = provider(MockHttpEngine::new(vec![MockResponse::json(
            200,
            r#"{"result":0,"email":"ada@example.test","quota":1000,"usedquota":100}"#,
        )]));
        let data = provider.general_data().await.unwrap();
        assert_eq!(data.username, "ada@example.test");
        assert_eq!(data.space_used, 100);
        assert_eq!(data.space_total, 1000);
    }
}
