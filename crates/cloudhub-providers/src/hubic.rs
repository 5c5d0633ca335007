//! hubiC adapter (SPEC_FULL.md §4.5 "hubiC").
//!
//! hubiC bootstraps with the same OAuth2/PKCE flow as Google/OneDrive/Dropbox
//! (reusing [`crate::common::oauth2_auth`]), but the resulting access token
//! isn't used against hubiC's own API directly: it's exchanged once for a
//! short-lived OpenStack Swift endpoint + token pair via hubiC's
//! `/1.0/account/credentials` call, and every file operation after that
//! speaks plain Swift (`X-Auth-Token` header, container/object URLs) rather
//! than OAuth2 bearer auth.

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::common::{authorized_request, ensure_success, execute, parse_json, InitData, PendingVerifier, ProviderContext, DEFAULT_REAUTH_CODES};

const AUTH_URL: &str = "https://api.hubic.com/oauth/auth/";
const TOKEN_URL: &str = "https://api.hubic.com/oauth/token/";
const CREDENTIALS_URL: &str = "https://api.hubic.com/1.0/account/credentials";
const CONTAINER: &str = "default";

#[derive(Debug, Deserialize)]
struct SwiftCredentials {
    token: String,
    endpoint: String,
}

#[derive(Debug, Clone, Default)]
struct SwiftSession {
    token: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct SwiftObject {
    name: String,
    #[serde(default)]
    bytes: Option<u64>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    subdir: Option<String>,
}

fn to_item(obj: SwiftObject) -> Result<Item, CoreError> {
    if let Some(subdir) = obj.subdir {
        let name = subdir.trim_end_matches('/').rsplit('/').next().unwrap_or(&subdir).to_string();
        return Ok(Item {
            id: ItemId::new(subdir.clone())?,
            filename: name,
            size: None.into(),
            timestamp: None.into(),
            item_type: ItemType::Directory,
            url: None,
            thumbnail_url: None,
        });
    }
    let filename = obj.name.rsplit('/').next().unwrap_or(&obj.name).to_string();
    let timestamp = obj
        .last_modified
        .as_deref()
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&chrono::Utc));
    let item_type = ItemType::from_filename(&filename);
    Ok(Item {
        id: ItemId::new(obj.name)?,
        filename,
        size: obj.bytes.into(),
        timestamp: timestamp.into(),
        item_type,
        url: None,
        thumbnail_url: None,
    })
}

pub struct HubicProvider {
    ctx: ProviderContext,
    pending_verifier: PendingVerifier,
    swift: RwLock<SwiftSession>,
    root: Item,
}

impl HubicProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let hints = init.hints.clone();
        let (auth, _flow) = crate::common::oauth2_auth(
            init.token.clone(),
            hints.get("client_id").cloned().unwrap_or_default(),
            hints.get("client_secret").cloned(),
            AUTH_URL.to_string(),
            TOKEN_URL.to_string(),
            hints.get("redirect_uri").cloned().unwrap_or_default(),
            vec!["credentials.r".into(), "usage.r".into()],
            init.callback.clone(),
        )?;
        Ok(Self {
            ctx: ProviderContext::new(init, auth),
            pending_verifier: PendingVerifier::new(),
            swift: RwLock::new(SwiftSession::default()),
            root: Item::directory(ItemId::new("/")?, ""),
        })
    }

    fn flow(&self) -> Result<cloudhub_oauth::PkceFlow, CoreError> {
        let config = cloudhub_oauth::PkceConfig {
            client_id: self.ctx.hints.get("client_id").cloned().unwrap_or_default(),
            client_secret: self.ctx.hints.get("client_secret").cloned(),
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            redirect_uri: self.ctx.hints.get("redirect_uri").cloned().unwrap_or_default(),
            scopes: vec!["credentials.r".into(), "usage.r".into()],
        };
        cloudhub_oauth::PkceFlow::new(&config)
    }

    async fn swift_session(&self) -> Result<SwiftSession, CoreError> {
        {
            let session = self.swift.read().await;
            if !session.token.is_empty() {
                return Ok(session.clone());
            }
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            CREDENTIALS_URL,
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let creds: SwiftCredentials = parse_json(&response)?;
        let session = SwiftSession { token: creds.token, endpoint: creds.endpoint };
        *self.swift.write().await = session.clone();
        Ok(session)
    }

    fn object_url(&self, session: &SwiftSession, path: &str) -> String {
        format!("{}/{CONTAINER}/{}", session.endpoint.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl CloudProvider for HubicProvider {
    fn name(&self) -> &str {
        "hubic"
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
        *self.swift.write().await = SwiftSession::default();
        self.ctx.auth.reauthorize().await
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        let session = self.swift_session().await?;
        let prefix = dir.id.as_str().trim_start_matches('/');
        let mut query = vec![
            ("delimiter".to_string(), "/".to_string()),
            ("format".to_string(), "json".to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".to_string(), format!("{}/", prefix.trim_end_matches('/'))));
        }
        if !page_token.is_empty() {
            query.push(("marker".to_string(), page_token.to_string()));
        }
        let url = format!("{}/{CONTAINER}", session.endpoint.trim_end_matches('/'));
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Get,
            &url,
            &[("X-Auth-Token".to_string(), session.token.clone())],
            &query,
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        let objects: Vec<SwiftObject> = parse_json(&response)?;
        let next_token = objects.last().and_then(|o| {
            if o.subdir.is_some() { None } else { Some(o.name.clone()) }
        }).unwrap_or_default();
        Ok(ListPage {
            items: objects.into_iter().map(to_item).collect::<Result<_, _>>()?,
            next_token,
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let session = self.swift_session().await?;
        let url = self.object_url(&session, id.as_str());
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Head,
            &url,
            &[("X-Auth-Token".to_string(), session.token.clone())],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        let size = response.header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
        let filename = id.as_str().rsplit('/').next().unwrap_or(id.as_str()).to_string();
        Ok(Item {
            id: id.clone(),
            filename: filename.clone(),
            size: Some(size).into(),
            timestamp: None.into(),
            item_type: ItemType::from_filename(&filename),
            url: None,
            thumbnail_url: None,
        })
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        let session = self.swift_session().await?;
        Ok(self.object_url(&session, item.id.as_str()))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let session = self.swift_session().await?;
        let url = self.object_url(&session, item.id.as_str());
        let mut headers = vec![("X-Auth-Token".to_string(), session.token.clone())];
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
        let session = self.swift_session().await?;
        let path = format!("{}/{filename}", parent.id.as_str().trim_end_matches('/')).trim_start_matches('/').to_string();
        let url = self.object_url(&session, &path);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Put,
            &url,
            &[("X-Auth-Token".to_string(), session.token.clone())],
            &[],
            Some(content.clone()),
            true,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(path)?).await
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let session = self.swift_session().await?;
        let path = format!("{}/{name}/", parent.id.as_str().trim_end_matches('/')).trim_start_matches('/').to_string();
        let url = self.object_url(&session, &path);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Put,
            &url,
            &[
                ("X-Auth-Token".to_string(), session.token.clone()),
                ("Content-Type".to_string(), "application/directory".to_string()),
            ],
            &[],
            Some(Vec::new()),
            true,
        )
        .await?;
        ensure_success(&response)?;
        Ok(Item::directory(ItemId::new(path)?, name))
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let session = self.swift_session().await?;
        let url = self.object_url(&session, item.id.as_str());
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Delete,
            &url,
            &[("X-Auth-Token".to_string(), session.token.clone())],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)
    }

    async fn move_item(&self, _item: &Item, _new_parent: &Item) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("move_item (swift has no atomic move; copy+delete not yet implemented)"))
    }

    async fn rename(&self, _item: &Item, _new_name: &str) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("rename (swift has no atomic rename; copy+delete not yet implemented)"))
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let session = self.swift_session().await?;
        let url = format!("{}/{CONTAINER}", session.endpoint.trim_end_matches('/'));
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Head,
            &url,
            &[("X-Auth-Token".to_string(), session.token.clone())],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        let space_used = response
            .header("x-container-bytes-used")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(GeneralData { username: String::new(), space_used, space_total: 0 })
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
        hints.insert("redirect_uri".to_string(), "http://127.0.0.1:12345/hubic".to_string());
        hints
    }

    fn provider(engine: MockHttpEngine) -> HubicProvider {
        HubicProvider::new(InitData {
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
    async fn list_directory_page_bootstraps_swift_credentials_then_lists() {
        let provider = provider(MockHttpEngine::new(vec![
            MockResponse::json(200, r#"{"token":"swift-tok","endpoint":"https://swift.example.test/v1/AUTH_x"}"#),
            MockResponse::json(200, r#"[{"name":"a.txt","bytes":5}]"#),
        ]));

        let page = provider
            .list_directory_page(&provider.root_directory(), "")
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].filename, "a.txt");
    }

    #[tokio::test]
    async fn general_data_reads_container_usage_header() {
        let provider = provider(MockHttpEngine::new(vec![
            MockResponse::json(200, r#"{"token":"swift-tok","endpoint":"https://swift.example.test/v1/AUTH_x"}"#),
            MockResponse::empty(204).with_header("x-container-bytes-used", "1024"),
        ]));

        let data = provider.general_data().await.unwrap();
        assert_eq!(data.space_used, 1024);
    }
}
