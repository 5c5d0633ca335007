//! Google Photos adapter (SPEC_FULL.md §4.5 "Google Photos").
//!
//! Reuses Google's OAuth2 endpoints (see [`crate::google`]) against the
//! separate Photos Library API, whose object model has no folders: the root
//! listing is the album list, and each album is a "directory" of media
//! items. Sparse coverage per SPEC_FULL.md §9 — the Library API has no
//! delete or move/rename surface for media items created outside the
//! calling app, so those four mutating operations return `Unimplemented`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use serde::Deserialize;
use serde_json::json;

use crate::common::{
    authorized_request, ensure_success, execute, parse_json, InitData, PendingVerifier,
    ProviderContext, DEFAULT_REAUTH_CODES,
};

const API_URL: &str = "https://photoslibrary.googleapis.com/v1";
const UPLOAD_URL: &str = "https://photoslibrary.googleapis.com/v1/uploads";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const ROOT_ID: &str = "albums";

#[derive(Debug, Deserialize)]
struct Album {
    id: String,
    #[serde(default, rename = "title")]
    title: Option<String>,
    #[serde(default, rename = "mediaItemsCount")]
    media_items_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlbumList {
    #[serde(default)]
    albums: Vec<Album>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaMetadata {
    #[serde(default, rename = "creationTime")]
    creation_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default, rename = "baseUrl")]
    base_url: Option<String>,
    #[serde(default, rename = "mediaMetadata")]
    media_metadata: Option<MediaMetadata>,
}

#[derive(Debug, Deserialize)]
struct MediaItemSearch {
    #[serde(default, rename = "mediaItems")]
    media_items: Vec<MediaItem>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewMediaItemResult {
    status: Status,
    #[serde(default, rename = "mediaItem")]
    media_item: Option<MediaItem>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BatchCreateResponse {
    #[serde(rename = "newMediaItemResults")]
    new_media_item_results: Vec<NewMediaItemResult>,
}

fn album_id(id: &ItemId) -> &str {
    id.as_str().strip_prefix("album:").unwrap_or(id.as_str())
}

fn album_to_item(album: Album) -> Result<Item, CoreError> {
    let count = album
        .media_items_count
        .as_deref()
        .and_then(|c| c.parse::<u64>().ok());
    Ok(Item {
        id: ItemId::new(format!("album:{}", album.id))?,
        filename: album.title.unwrap_or_else(|| album.id.clone()),
        size: count.into(),
        timestamp: None.into(),
        item_type: ItemType::Directory,
        url: None,
        thumbnail_url: None,
    })
}

fn media_item_to_item(item: MediaItem) -> Result<Item, CoreError> {
    let filename = item.filename.clone().unwrap_or_else(|| item.id.clone());
    let timestamp = item
        .media_metadata
        .as_ref()
        .and_then(|m| m.creation_time);
    Ok(Item {
        id: ItemId::new(format!("item:{}", item.id))?,
        item_type: ItemType::from_filename(&filename),
        filename,
        size: None.into(),
        timestamp: timestamp.into(),
        url: item.base_url.clone(),
        thumbnail_url: item.base_url.map(|u| format!("{u}=w200-h200")),
    })
}

pub struct GooglePhotosProvider {
    ctx: ProviderContext,
    pending_verifier: PendingVerifier,
    root: Item,
}

impl GooglePhotosProvider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let hints = init.hints.clone();
        let (auth, _flow) = crate::common::oauth2_auth(
            init.token.clone(),
            hints.get("client_id").cloned().unwrap_or_default(),
            hints.get("client_secret").cloned(),
            AUTH_URL.to_string(),
            TOKEN_URL.to_string(),
            hints.get("redirect_uri").cloned().unwrap_or_default(),
            vec!["https://www.googleapis.com/auth/photoslibrary.readonly".into()],
            init.callback.clone(),
        )?;
        Ok(Self {
            ctx: ProviderContext::new(init, auth),
            pending_verifier: PendingVerifier::new(),
            root: Item::directory(ItemId::new(ROOT_ID)?, ""),
        })
    }

    fn flow(&self) -> Result<cloudhub_oauth::PkceFlow, CoreError> {
        let config = cloudhub_oauth::PkceConfig {
            client_id: self.ctx.hints.get("client_id").cloned().unwrap_or_default(),
            client_secret: self.ctx.hints.get("client_secret").cloned(),
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            redirect_uri: self.ctx.hints.get("redirect_uri").cloned().unwrap_or_default(),
            scopes: vec!["https://www.googleapis.com/auth/photoslibrary.readonly".into()],
        };
        cloudhub_oauth::PkceFlow::new(&config)
    }
}

#[async_trait]
impl CloudProvider for GooglePhotosProvider {
    fn name(&self) -> &str {
        "gphotos"
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
        if dir.id.as_str() == ROOT_ID {
            let mut query = vec![("pageSize".to_string(), "50".to_string())];
            if !page_token.is_empty() {
                query.push(("pageToken".to_string(), page_token.to_string()));
            }
            let response = authorized_request(
                &self.ctx,
                HttpMethod::Get,
                &format!("{API_URL}/albums"),
                &[],
                &query,
                None,
                DEFAULT_REAUTH_CODES,
            )
            .await?;
            ensure_success(&response)?;
            let list: AlbumList = parse_json(&response)?;
            return Ok(ListPage {
                items: list.albums.into_iter().map(album_to_item).collect::<Result<_, _>>()?,
                next_token: list.next_page_token.unwrap_or_default(),
            });
        }

        let mut body = json!({
            "albumId": album_id(&dir.id),
            "pageSize": 100,
        });
        if !page_token.is_empty() {
            body["pageToken"] = json!(page_token);
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}/mediaItems:search"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let search: MediaItemSearch = parse_json(&response)?;
        Ok(ListPage {
            items: search.media_items.into_iter().map(media_item_to_item).collect::<Result<_, _>>()?,
            next_token: search.next_page_token.unwrap_or_default(),
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        if let Some(media_id) = id.as_str().strip_prefix("item:") {
            let response = authorized_request(
                &self.ctx,
                HttpMethod::Get,
                &format!("{API_URL}/mediaItems/{media_id}"),
                &[],
                &[],
                None,
                DEFAULT_REAUTH_CODES,
            )
            .await?;
            ensure_success(&response)?;
            let item: MediaItem = parse_json(&response)?;
            return media_item_to_item(item);
        }
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Get,
            &format!("{API_URL}/albums/{}", album_id(id)),
            &[],
            &[],
            None,
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let album: Album = parse_json(&response)?;
        album_to_item(album)
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        item.url
            .clone()
            .ok_or_else(|| CoreError::not_found("media item has no baseUrl"))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let base_url = self.get_file_url(item).await?;
        let url = format!("{base_url}=d");
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
        let upload_response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            UPLOAD_URL,
            &[
                ("Content-Type".to_string(), "application/octet-stream".to_string()),
                ("X-Goog-Upload-File-Name".to_string(), filename.to_string()),
                ("X-Goog-Upload-Protocol".to_string(), "raw".to_string()),
            ],
            &[],
            Some(content),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&upload_response)?;
        let upload_token = upload_response.body_str().into_owned();

        let body = json!({
            "albumId": album_id(&parent.id),
            "newMediaItems": [{
                "simpleMediaItem": { "fileName": filename, "uploadToken": upload_token }
            }]
        });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}/mediaItems:batchCreate"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let batch: BatchCreateResponse = parse_json(&response)?;
        let result = batch
            .new_media_item_results
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::parse("empty batchCreate response"))?;
        match result.media_item {
            Some(item) => media_item_to_item(item),
            None => Err(CoreError::http(400, result.status.message)),
        }
    }

    async fn mkdir(&self, _parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let body = json!({ "album": { "title": name } });
        let response = authorized_request(
            &self.ctx,
            HttpMethod::Post,
            &format!("{API_URL}/albums"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            &[],
            Some(serde_json::to_vec(&body).map_err(|e| CoreError::parse(e.to_string()))?),
            DEFAULT_REAUTH_CODES,
        )
        .await?;
        ensure_success(&response)?;
        let album: Album = parse_json(&response)?;
        album_to_item(album)
    }

    async fn delete(&self, _item: &Item) -> Result<(), CoreError> {
        Err(CoreError::unimplemented("delete (Photos Library API has no delete endpoint)"))
    }

    async fn move_item(&self, _item: &Item, _new_parent: &Item) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("move_item"))
    }

    async fn rename(&self, _item: &Item, _new_name: &str) -> Result<Item, CoreError> {
        Err(CoreError::unimplemented("rename"))
    }

    async fn get_thumbnail(&self, item: &Item) -> Result<Vec<u8>, CoreError> {
        let Some(thumb_url) = item.thumbnail_url.clone() else {
            return Err(CoreError::unimplemented("get_thumbnail"));
        };
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Get, &thumb_url, &[], &[], None, true).await?;
        ensure_success(&response)?;
        Ok(response.body)
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        Err(CoreError::unimplemented(
            "general_data (Photos Library API exposes no quota endpoint)",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_id_strips_the_album_prefix() {
        let id = ItemId::new("album:abc123").unwrap();
        assert_eq!(album_id(&id), "abc123");
    }

    #[test]
    fn media_item_without_filename_falls_back_to_id() {
        let item = MediaItem {
            id: "m1".to_string(),
            filename: None,
            base_url: Some("https://example.test/photo".to_string()),
            media_metadata: None,
        };
        let converted = media_item_to_item(item).unwrap();
        assert_eq!(converted.filename, "m1");
        assert_eq!(converted.thumbnail_url.as_deref(), Some("https://example.test/photo=w200-h200"));
    }
}
