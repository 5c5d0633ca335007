//! Yandex.Disk adapter (SPEC_FULL.md §4.5 "Yandex.Disk").
//!
//! Sparse coverage per SPEC_FULL.md §9: full CRUD and paging, but no
//! thumbnail or quota niceties beyond what a single `/disk` call already
//! returns for free. Shares the same bearer + single-retry shape as
//! OneDrive/Google/Dropbox/Box via [`crate::common::authorized_request`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use serde::Deserialize;

use crate::common::{authorized_request, ensure_success, execute, parse_json, InitData, PendingVerifier, ProviderContext, DEFAULT_REAUTH_CODES};

const API_URL: &str = "https://cloud-api.yandex.net/v1/disk/resources";
const DISK_URL: &str = "https://cloud-api.yandex.net/v1/disk";
const AUTH_URL: &str = "https://oauth.yandex.com/authorize";
const TOKEN_URL: &str = "https://oauth.yandex.com/token";
const PAGE_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct YandexResource {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    items: Vec<YandexResource>,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct YandexResourceResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
    #[serde(flatten)]
    resource: YandexResource,
}

#[derive(Debug, Deserialize)]
struct UploadLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct DiskInfo {
    #[serde(default)]
    user: Option<DiskUser>,
    total_space: u64,
    used_space: u64,
}

#[derive(Debug, Deserialize)]
struct DiskUser {
    login: String,
}

fn to_item(res: YandexResource) -> Result<Item, CoreError> {
    let item_type = if res.kind == "dir" {
        ItemType::Directory
    } else {
        ItemType::from_filename(&res.name)
    };
    Ok(Item {
        id: ItemId::new(res.path)?,
        filename: res.name,
        size: res.size.into(),
        timestamp: res.modified.into(),
        item_type,
        url: res.file,
        thumbnail_url: None,
    })
}

pub struct YandexDiskProvider {
    ctx: ProviderContext,
    pending_verifier: PendingVerifier,
    root: Item,
}

impl YandexDiskProvider {
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
            root: Item::directory(ItemId::new("disk:/")?, ""),
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
impl CloudProvider for YandexDiskProvider {
    fn name(&self) -> &str {
        "yandex"
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
            API_URL,
            &[],
            &[
                ("path".to_string(), dir.id.as_str().to_string()),
                ("limit".to_string(), PAGE_LIMIT.to_string()),
                ("offset".to_string(), offset.to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: YandexResourceResponse = parse_json(&response)?;
        let embedded = page.embedded.ok_or_else(|| CoreError::parse("expected a directory listing"))?;
        let next_offset = embedded.offset + embedded.limit;
        let next_token = if next_offset < embedded.total { next_offset.to_string() } else { String::new() };
        Ok(ListPage {
            items: embedded.items.into_iter().map(to_item).collect::<Result<_, _>>()?,
            next_token,
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            API_URL,
            &[],
            &[("path".to_string(), id.as_str().to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let page: YandexResourceResponse = parse_json(&response)?;
        to_item(page.resource)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        if let Some(url) = &item.url {
            return Ok(url.clone());
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/download"),
            &[],
            &[("path".to_string(), item.id.as_str().to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let link: UploadLink = parse_json(&response)?;
        Ok(link.href)
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
        let path = format!("{}/{filename}", parent.id.as_str().trim_end_matches('/'));
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/upload"),
            &[],
            &[("path".to_string(), path.clone()), ("overwrite".to_string(), "true".to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let link: UploadLink = parse_json(&response)?;
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Put, &link.href, &[], &[], Some(content), true).await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(path)?).await
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let path = format!("{}/{name}", parent.id.as_str().trim_end_matches('/'));
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Put,
            API_URL,
            &[],
            &[("path".to_string(), path.clone())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(path)?).await
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Delete,
            API_URL,
            &[],
            &[("path".to_string(), item.id.as_str().to_string()), ("permanently".to_string(), "true".to_string())],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let destination = format!("{}/{}", new_parent.id.as_str().trim_end_matches('/'), item.filename);
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}/move"),
            &[],
            &[
                ("from".to_string(), item.id.as_str().to_string()),
                ("path".to_string(), destination.clone()),
                ("overwrite".to_string(), "true".to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(destination)?).await
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let parent = item.id.as_str().rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        let destination = format!("{parent}/{new_name}");
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}/move"),
            &[],
            &[
                ("from".to_string(), item.id.as_str().to_string()),
                ("path".to_string(), destination.clone()),
                ("overwrite".to_string(), "true".to_string()),
            ],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(destination)?).await
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            DISK_URL,
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let info: DiskInfo = parse_json(&response)?;
        Ok(GeneralData {
            username: info.user.map(|u| u.login).unwrap_or_default(),
            space_used: info.used_space,
            space_total: info.total_space,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_resource_maps_to_a_directory_item() {
        let res = YandexResource {
            name: "Photos".to_string(),
            path: "disk:/Photos".to_string(),
            kind: "dir".to_string(),
            size: None,
            modified: None,
            file: None,
        };
        let item = to_item(res).unwrap();
        assert!(item.item_type.is_directory());
        assert_eq!(item.id.as_str(), "disk:/Photos");
    }

    #[test]
    fn file_resource_classifies_by_extension() {
        let res = YandexResource {
            name: "report.pdf".to_string(),
            path: "disk:/report.pdf".to_string(),
            kind: "file".to_string(),
            size: Some(2048),
            modified: None,
            file: Some("https://example.test/download".to_string()),
        };
        let item = to_item(res).unwrap();
        assert!(!item.item_type.is_directory());
        assert_eq!(item.size.known().copied(), Some(2048));
        assert_eq!(item.url.as_deref(), Some("https://example.test/download"));
    }
}
