//! AWS S3 adapter (SPEC_FULL.md §4.5.1 "Amazon S3" / SigV4).
//!
//! Request signing follows the same canonical-request / string-to-sign /
//! derived-signing-key shape as the reference S3 client's
//! `Bucket::build_headers`, generalized off its `Command`/`Region` types onto
//! a flat bucket+region+credential pair stored directly in the item's
//! `Token`/`Hints`. No multipart upload: objects are PUT in one shot, which
//! matches this adapter's sparse-coverage allowance (SPEC_FULL.md §9).

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, Permission, Range, Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_http::HttpMethod;
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::common::{ensure_success, execute, InitData, ProviderContext};

type HmacSha256 = Hmac<Sha256>;

const LONG_DATE_TIME: &[time::format_description::FormatItem] =
    time::macros::format_description!("[year][month][day]T[hour][minute][second]Z");
const SHORT_DATE: &[time::format_description::FormatItem] =
    time::macros::format_description!("[year][month][day]");

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hmac_raw(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(b as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

struct S3Credentials {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    bucket: String,
    endpoint: String,
    path_style: bool,
}

fn decode_credentials(token: &Token, hints: &Hints) -> Result<S3Credentials, CoreError> {
    let mut parts = token.refresh_token.splitn(2, ':');
    let access_key_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::auth("missing S3 access key id"))?
        .to_string();
    let secret_access_key = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::auth("missing S3 secret access key"))?
        .to_string();
    Ok(S3Credentials {
        access_key_id,
        secret_access_key,
        region: hints.get("region").cloned().unwrap_or_else(|| "us-east-1".to_string()),
        bucket: hints
            .get("bucket")
            .cloned()
            .ok_or_else(|| CoreError::auth("missing S3 bucket hint"))?,
        endpoint: hints
            .get("endpoint")
            .cloned()
            .unwrap_or_else(|| "s3.amazonaws.com".to_string()),
        path_style: hints.get("path_style").map(|v| v == "true").unwrap_or(false),
    })
}

struct SignedRequest {
    url: String,
    headers: Vec<(String, String)>,
}

/// Presigned-URL SigV4, matching the reference client's
/// `authorizeRequest()`: every `X-Amz-*` field rides in the query string
/// (never an `Authorization` header) and the payload hash is the literal
/// string `UNSIGNED-PAYLOAD`, since the body is never part of what's signed.
fn sign(
    creds: &S3Credentials,
    method: HttpMethod,
    key: &str,
    query: &[(String, String)],
) -> SignedRequest {
    let now = OffsetDateTime::now_utc();
    let amz_date = now.format(LONG_DATE_TIME).unwrap_or_default();
    let short_date = now.format(SHORT_DATE).unwrap_or_default();

    let host = if creds.path_style {
        creds.endpoint.clone()
    } else {
        format!("{}.{}", creds.bucket, creds.endpoint)
    };
    let canonical_path = if creds.path_style {
        format!("/{}/{}", creds.bucket, key.trim_start_matches('/'))
    } else {
        format!("/{}", key.trim_start_matches('/'))
    };
    let encoded_path = uri_encode(&canonical_path, false);

    let scope = format!("{short_date}/{}/s3/aws4_request", creds.region);
    let credential = format!("{}/{scope}", creds.access_key_id);

    let mut signed_query = query.to_vec();
    signed_query.push(("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()));
    signed_query.push(("X-Amz-Credential".to_string(), credential));
    signed_query.push(("X-Amz-Date".to_string(), amz_date.clone()));
    signed_query.push(("X-Amz-Expires".to_string(), "86400".to_string()));
    signed_query.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));
    signed_query.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_query = signed_query
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers = format!("host:{host}\n");
    let signed_headers = "host";

    let method_str = match method {
        HttpMethod::Get => "GET",
        HttpMethod::Put => "PUT",
        HttpMethod::Post => "POST",
        HttpMethod::Delete => "DELETE",
        HttpMethod::Head => "HEAD",
        _ => "GET",
    };

    let canonical_request = format!(
        "{method_str}\n{encoded_path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\nUNSIGNED-PAYLOAD"
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_raw(format!("AWS4{}", creds.secret_access_key).as_bytes(), &short_date);
    let k_region = hmac_raw(&k_date, &creds.region);
    let k_service = hmac_raw(&k_region, "s3");
    let k_signing = hmac_raw(&k_service, "aws4_request");
    let signature = hex_encode(&hmac_raw(&k_signing, &string_to_sign));

    SignedRequest {
        url: format!("https://{host}{encoded_path}?{canonical_query}&X-Amz-Signature={signature}"),
        headers: Vec::new(),
    }
}

fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Default)]
struct S3Object {
    key: String,
    size: u64,
    last_modified: Option<String>,
}

fn parse_list_bucket_result(xml: &str) -> Result<(Vec<S3Object>, Vec<String>, bool, String), CoreError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut objects = Vec::new();
    let mut prefixes = Vec::new();
    let mut current: Option<S3Object> = None;
    let mut current_tag: Option<String> = None;
    let mut is_truncated = false;
    let mut next_token = String::new();
    let mut in_common_prefix = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "Contents" => current = Some(S3Object::default()),
                    "CommonPrefixes" => in_common_prefix = true,
                    "Key" | "Size" | "LastModified" | "NextContinuationToken" | "IsTruncated" | "Prefix" => {
                        current_tag = Some(local);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(tag) = current_tag.as_deref() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match tag {
                        "Key" if !in_common_prefix => {
                            if let Some(obj) = current.as_mut() {
                                obj.key = text;
                            }
                        }
                        "Size" => {
                            if let Some(obj) = current.as_mut() {
                                obj.size = text.parse().unwrap_or(0);
                            }
                        }
                        "LastModified" => {
                            if let Some(obj) = current.as_mut() {
                                obj.last_modified = Some(text);
                            }
                        }
                        "NextContinuationToken" => next_token = text,
                        "IsTruncated" => is_truncated = text == "true",
                        "Prefix" if in_common_prefix => prefixes.push(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "Contents" => {
                        if let Some(obj) = current.take() {
                            objects.push(obj);
                        }
                    }
                    "CommonPrefixes" => in_common_prefix = false,
                    _ => {
                        if current_tag.as_deref() == Some(local.as_str()) {
                            current_tag = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CoreError::parse(format!("s3 list bucket result: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok((objects, prefixes, is_truncated, next_token))
}

fn object_to_item(key: &str, size: u64, last_modified: Option<&str>) -> Result<Item, CoreError> {
    let filename = key.trim_end_matches('/').rsplit('/').next().unwrap_or(key).to_string();
    let item_type = if key.ends_with('/') {
        ItemType::Directory
    } else {
        ItemType::from_filename(&filename)
    };
    let timestamp = last_modified.and_then(|t| time::OffsetDateTime::parse(t, &Rfc3339).ok());
    Ok(Item {
        id: ItemId::new(key.to_string())?,
        filename,
        size: Some(size).into(),
        timestamp: timestamp
            .map(|t| chrono::DateTime::from_timestamp(t.unix_timestamp(), 0).unwrap_or_default())
            .into(),
        item_type,
        url: None,
        thumbnail_url: None,
    })
}

pub struct S3Provider {
    ctx: ProviderContext,
    creds: S3Credentials,
    root: Item,
}

impl S3Provider {
    pub fn new(init: InitData) -> Result<Self, CoreError> {
        let creds = decode_credentials(&init.token, &init.hints)?;
        let token = init.token.clone();
        let auth = std::sync::Arc::new(cloudhub_oauth::Auth::new(token, std::sync::Arc::new(NeverRefresh)));
        let ctx = ProviderContext::new(init, auth);
        Ok(Self {
            ctx,
            root: Item::directory(ItemId::new("")?, ""),
            creds,
        })
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
impl CloudProvider for S3Provider {
    fn name(&self) -> &str {
        "amazons3"
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
        Err(CoreError::unimplemented("s3 uses access-key credentials, not an authorization code"))
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        Ok(self.token())
    }

    async fn list_directory_page(&self, dir: &Item, page_token: &str) -> Result<ListPage, CoreError> {
        let prefix = if dir.id.as_str().is_empty() {
            String::new()
        } else {
            format!("{}/", dir.id.as_str().trim_end_matches('/'))
        };
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("delimiter".to_string(), "/".to_string()),
            ("prefix".to_string(), prefix),
        ];
        if !page_token.is_empty() {
            query.push(("continuation-token".to_string(), page_token.to_string()));
        }
        let signed = sign(&self.creds, HttpMethod::Get, "", &query);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Get,
            &signed.url,
            &signed.headers,
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        let (objects, prefixes, truncated, next) = parse_list_bucket_result(&response.body_str())?;
        let mut items = Vec::new();
        for p in prefixes {
            items.push(object_to_item(&p, 0, None)?);
        }
        for obj in objects {
            if obj.key.ends_with('/') {
                continue;
            }
            items.push(object_to_item(&obj.key, obj.size, obj.last_modified.as_deref())?);
        }
        Ok(ListPage {
            items,
            next_token: if truncated { next } else { String::new() },
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let signed = sign(&self.creds, HttpMethod::Head, id.as_str(), &[]);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Head,
            &signed.url,
            &signed.headers,
            &[],
            None,
            true,
        )
        .await?;
        ensure_success(&response)?;
        let size = response
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let last_modified = response.header("last-modified").map(str::to_string);
        object_to_item(id.as_str(), size, last_modified.as_deref())
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        let signed = sign(&self.creds, HttpMethod::Get, item.id.as_str(), &[]);
        Ok(signed.url)
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let signed = sign(&self.creds, HttpMethod::Get, item.id.as_str(), &[]);
        let mut headers = signed.headers;
        if let Some((start, size)) = range.clamp(u64::MAX) {
            if !(range.is_full() && start == 0) {
                headers.push(("Range".to_string(), format!("bytes={start}-{}", start + size - 1)));
            }
        }
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Get, &signed.url, &headers, &[], None, true).await?;
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
        let key = if parent.id.as_str().is_empty() {
            filename.to_string()
        } else {
            format!("{}/{filename}", parent.id.as_str().trim_end_matches('/'))
        };
        let signed = sign(&self.creds, HttpMethod::Put, &key, &[]);
        let response = execute(
            self.ctx.http.as_ref(),
            HttpMethod::Put,
            &signed.url,
            &signed.headers,
            &[],
            Some(content.clone()),
            true,
        )
        .await?;
        ensure_success(&response)?;
        object_to_item(&key, content.len() as u64, None)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let key = if parent.id.as_str().is_empty() {
            format!("{name}/")
        } else {
            format!("{}/{name}/", parent.id.as_str().trim_end_matches('/'))
        };
        let signed = sign(&self.creds, HttpMethod::Put, &key, &[]);
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Put, &signed.url, &signed.headers, &[], Some(Vec::new()), true).await?;
        ensure_success(&response)?;
        object_to_item(&key, 0, None)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let signed = sign(&self.creds, HttpMethod::Delete, item.id.as_str(), &[]);
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Delete, &signed.url, &signed.headers, &[], None, true).await?;
        ensure_success(&response)
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let new_key = if new_parent.id.as_str().is_empty() {
            item.filename.clone()
        } else {
            format!("{}/{}", new_parent.id.as_str().trim_end_matches('/'), item.filename)
        };
        let copy_source = format!("/{}/{}", self.creds.bucket, item.id.as_str());
        let signed = sign(&self.creds, HttpMethod::Put, &new_key, &[]);
        let mut headers = signed.headers;
        headers.push(("x-amz-copy-source".to_string(), copy_source));
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Put, &signed.url, &headers, &[], Some(Vec::new()), true).await?;
        ensure_success(&response)?;
        self.delete(item).await?;
        object_to_item(&new_key, item.size.known().copied().unwrap_or(0), None)
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let parent = item
            .id
            .as_str()
            .rsplit_once('/')
            .map(|(p, _)| p.to_string())
            .unwrap_or_default();
        let new_key = if parent.is_empty() { new_name.to_string() } else { format!("{parent}/{new_name}") };
        let copy_source = format!("/{}/{}", self.creds.bucket, item.id.as_str());
        let signed = sign(&self.creds, HttpMethod::Put, &new_key, &[]);
        let mut headers = signed.headers;
        headers.push(("x-amz-copy-source".to_string(), copy_source));
        let response = execute(self.ctx.http.as_ref(), HttpMethod::Put, &signed.url, &headers, &[], Some(Vec::new()), true).await?;
        ensure_success(&response)?;
        self.delete(item).await?;
        object_to_item(&new_key, item.size.known().copied().unwrap_or(0), None)
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        Ok(GeneralData {
            username: self.creds.bucket.clone(),
            space_used: 0,
            space_total: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_encode_preserves_unreserved_characters() {
        assert_eq!(uri_encode("abc-._~123", false), "abc-._~123");
        assert_eq!(uri_encode("a/b", false), "a/b");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
    }

    #[test]
    fn parses_a_minimal_list_bucket_result() {
        let xml = r#"<?xml version="1.0"?>
<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>notes/todo.txt</Key>
    <Size>42</Size>
    <LastModified>2026-01-01T00:00:00.000Z</LastModified>
  </Contents>
</ListBucketResult>"#;
        let (objects, _, truncated, _) = parse_list_bucket_result(xml).unwrap();
        assert!(!truncated);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "notes/todo.txt");
        assert_eq!(objects[0].size, 42);
    }
}
