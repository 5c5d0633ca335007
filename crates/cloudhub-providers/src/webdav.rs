//! Generic WebDAV adapter (SPEC_FULL.md §4.5 "WebDAV").
//!
//! No OAuth2 reauthorization loop: credentials are Basic-auth and don't
//! expire, so this adapter calls [`crate::common::execute`] directly with a
//! hand-built `Authorization: Basic` header rather than going through
//! [`crate::common::authorized_request`]. The multistatus XML parser is
//! grounded on the reference Nextcloud client's `parse_multistatus_xml`,
//! generalized off its `DavResource` type onto this crate's `Item`.

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::common::{ensure_success, execute, InitData, ProviderContext};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
  </d:prop>
</d:propfind>"#;

#[derive(Debug, Clone, Default)]
struct DavResource {
    href: String,
    display_name: String,
    content_length: Option<u64>,
    last_modified: Option<String>,
    is_collection: bool,
}

fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

fn display_name_from_href(href: &str) -> String {
    let trimmed = href.trim_end_matches('/');
    let decoded = percent_decode(trimmed.rsplit('/').next().unwrap_or(trimmed));
    decoded
}

fn percent_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_multistatus(xml: &str) -> Result<Vec<DavResource>, CoreError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut resources = Vec::new();
    let mut current: Option<DavResource> = None;
    let mut in_resourcetype = false;
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => current = Some(DavResource::default()),
                    "resourcetype" => in_resourcetype = true,
                    "href" | "displayname" | "getcontentlength" | "getlastmodified" => {
                        current_tag = Some(local);
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                if local == "collection" && in_resourcetype {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(tag) = current_tag.as_deref() {
                    if let Some(res) = current.as_mut() {
                        let text = e.unescape().unwrap_or_default().to_string();
                        match tag {
                            "href" => res.href = text,
                            "displayname" => res.display_name = text,
                            "getcontentlength" => res.content_length = text.parse().ok(),
                            "getlastmodified" => res.last_modified = Some(text),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        if let Some(mut res) = current.take() {
                            if res.display_name.is_empty() {
                                res.display_name = display_name_from_href(&res.href);
                            }
                            resources.push(res);
                        }
                    }
                    "resourcetype" => in_resourcetype = false,
                    _ => {
                        if current_tag.as_deref() == Some(local.as_str()) {
                            current_tag = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CoreError::parse(format!("webdav multistatus: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(resources)
}

fn resource_to_item(res: DavResource) -> Result<Item, CoreError> {
    let item_type = if res.is_collection {
        ItemType::Directory
    } else {
        ItemType::from_filename(&res.display_name)
    };
    let timestamp = res
        .last_modified
        .as_deref()
        .and_then(|t| chrono::DateTime::parse_from_rfc2822(t).ok())
        .map(|t| t.with_timezone(&chrono::Utc));
    Ok(Item {
        id: ItemId::new(res.href.clone())?,
        filename: res.display_name,
        size: res.content_length.into(),
        timestamp: timestamp.into(),
        item_type,
        url: Some(res.href),
        thumbnail_url: None,
    })
}

/// Token encoding for WebDAV: `base64(JSON{username,password,endpoint})`,
/// since the `CloudProvider` port only exposes a single opaque `Token`.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct WebdavCredentials {
    username: String,
    password: String,
    endpoint: String,
}

fn decode_credentials(token: &Token) -> Result<WebdavCredentials, CoreError> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(token.refresh_token.as_bytes())
        .map_err(|e| CoreError::auth(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| CoreError::auth(e.to_string()))
}

fn basic_auth_header(username: &str, password: &str) -> String {
    use base64::Engine;
    let raw = format!("{username}:{password}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    )
}

pub struct WebdavProvider {
    ctx: ProviderContext,
    credentials: WebdavCredentials,
    root: Item,
}

impl WebdavProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let credentials = decode_credentials(&init.token)?;
        let endpoint = credentials.endpoint.trim_end_matches('/').to_string();
        let token = init.token.clone();
        let auth = std::sync::Arc::new(cloudhub_oauth::Auth::new(
            token,
            std::sync::Arc::new(NeverRefresh),
        ));
        let ctx = ProviderContext::new(init, auth);
        Ok(Self {
            ctx,
            root: Item::directory(ItemId::new(format!("{endpoint}/"))?, ""),
            credentials: WebdavCredentials { endpoint, ..credentials },
        })
    }

    fn auth_header(&self) -> (String, String) {
        (
            "Authorization".to_string(),
            basic_auth_header(&self.credentials.username, &self.credentials.password),
        )
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
impl CloudProvider for WebdavProvider {
    fn name(&self) -> &str {
        "webdav"
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
        String::new()
    }

    async fn exchange_code(&self, _code: &str) -> Result<Token, CoreError> {
        Err(CoreError::unimplemented("webdav uses direct credentials, not an authorization code"))
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        Ok(self.token())
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        if !page_token.is_empty() {
            return Ok(ListPage { items: Vec::new(), next_token: String::new() });
        }
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Propfind,
            dir.id.as_str(),
            &[
                self.auth_header(),
                ("Depth".to_string(), "1".to_string()),
                ("Content-Type".to_string(), "application/xml".to_string()),
            ],
            &[],
            Some(PROPFIND_BODY.as_bytes().to_vec()),
            true,
        )
        .await?;
        if response.status != 207 {
            ensure_success(&response)?;
        }
        let resources = parse_multistatus(&response.body_str())?;
        let self_href = dir.id.as_str().trim_end_matches('/');
        let items = resources
            .into_iter()
            .filter(|r| r.href.trim_end_matches('/') != self_href)
            .map(resource_to_item)
            .collect::<Result<_, _>>()?;
        Ok(ListPage { items, next_token: String::new() })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Propfind,
            id.as_str(),
            &[
                self.auth_header(),
                ("Depth".to_string(), "0".to_string()),
                ("Content-Type".to_string(), "application/xml".to_string()),
            ],
            &[],
            Some(PROPFIND_BODY.as_bytes().to_vec()),
            true,
        )
        .await?;
        if response.status != 207 {
            ensure_success(&response)?;
        }
        let resources = parse_multistatus(&response.body_str())?;
        resources
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found(id.as_str()))
            .and_then(resource_to_item)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        Ok(item.id.as_str().to_string())
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let mut headers = vec![self.auth_header()];
        if let Some((start, size)) = range.clamp(u64::MAX) {
            if !(range.is_full() && start == 0) {
                headers.push(("Range".to_string(), format!("bytes={start}-{}", start + size - 1)));
            }
        }
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Get,
            item.id.as_str(),
            &headers,
            &[],
            None,
            true,
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
        let url = format!("{}{filename}", parent.id.as_str());
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Put,
            &url,
            &[self.auth_header()],
            &[],
            Some(content),
            true,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(url)?).await
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let url = format!("{}{name}/", parent.id.as_str());
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Mkcol,
            &url,
            &[self.auth_header()],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(url)?).await
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Delete,
            item.id.as_str(),
            &[self.auth_header()],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let destination = format!("{}{}", new_parent.id.as_str(), item.filename);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Move,
            item.id.as_str(),
            &[self.auth_header(), ("Destination".to_string(), destination.clone())],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(destination)?).await
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let parent = item
            .id
            .as_str()
            .trim_end_matches('/')
            .rsplit_once('/')
            .map(|(p, _)| format!("{p}/"))
            .unwrap_or_default();
        let destination = format!("{parent}{new_name}");
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Move,
            item.id.as_str(),
            &[self.auth_header(), ("Destination".to_string(), destination.clone())],
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        self.get_item_data(&ItemId::new(destination)?).await
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        Ok(GeneralData {
            username: self.credentials.username.clone(),
            space_used: 0,
            space_total: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_multistatus_response() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/dav/files/alice/docs/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:displayname>docs</d:displayname>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/alice/docs/report.pdf</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:displayname>report.pdf</d:displayname>
        <d:getcontentlength>4096</d:getcontentlength>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;
        let resources = parse_multistatus(xml).unwrap();
        assert_eq!(resources.len(), 2);
        assert!(resources[0].is_collection);
        assert_eq!(resources[1].content_length, Some(4096));
    }

    #[test]
    fn decodes_base64_json_credentials() {
        use base64::Engine;
        let raw = serde_json::to_vec(&WebdavCredentials {
            username: "alice".into(),
            password: "secret".into(),
            endpoint: "https://cloud.example.com/remote.php/dav/files/alice".into(),
        })
        .unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        let token = Token::non_oauth(encoded);
        let decoded = decode_credentials(&token).unwrap();
        assert_eq!(decoded.username, "alice");
    }
}
