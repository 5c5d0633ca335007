//! Local filesystem backend (SPEC_FULL.md §4.5 "Local / LocalWinRT").
//!
//! No remote calls: every operation is a direct filesystem call, dispatched
//! through the thread pool so it never blocks the event-loop task. Both
//! `"local"` and `"localwinrt"` construct this adapter — `LocalWinRT`'s
//! storage-picker UI is an out-of-scope collaborator, so the two share
//! identical operational semantics here and differ only by the registered
//! provider name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cloudhub_core::domain::{
    CoreError, GeneralData, Hints, Item, ItemId, ItemType, ListPage, MaybeKnown, Permission, Range,
    Token,
};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink, UploadSource};
use cloudhub_runtime::ThreadPool;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const READ_CHUNK: usize = 64 * 1024;

pub struct LocalProvider {
    name: &'static str,
    root: PathBuf,
    root_item: Item,
    permission: Permission,
    hints: Hints,
    token: Token,
    thread_pool: Arc<ThreadPool>,
}

impl LocalProvider {
    pub fn new(
        name: &'static str,
        root: PathBuf,
        hints: Hints,
        permission: Permission,
        token: Token,
        thread_pool: Arc<ThreadPool>,
    ) -> Result<Self, CoreError> {
        let id = ItemId::new(root.to_string_lossy().into_owned())?;
        let root_item = Item::directory(id, root.to_string_lossy().into_owned());
        Ok(Self {
            name,
            root,
            root_item,
            permission,
            hints,
            token,
            thread_pool,
        })
    }

    fn path_for(&self, item: &Item) -> PathBuf {
        PathBuf::from(item.id.as_str())
    }

    fn item_for_path(path: &Path, metadata: &std::fs::Metadata) -> Result<Item, CoreError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let item_type = if metadata.is_dir() {
            ItemType::Directory
        } else {
            ItemType::from_filename(&filename)
        };
        let timestamp = metadata
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .into();
        Ok(Item {
            id: ItemId::new(path.to_string_lossy().into_owned())?,
            filename,
            size: if metadata.is_dir() {
                MaybeKnown::Unknown
            } else {
                MaybeKnown::Known(metadata.len())
            },
            timestamp,
            item_type,
            url: Some(format!("file://{}", path.display())),
            thumbnail_url: None,
        })
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn root_directory(&self) -> Item {
        self.root_item.clone()
    }

    fn permission(&self) -> Permission {
        self.permission
    }

    fn hints(&self) -> &Hints {
        &self.hints
    }

    fn token(&self) -> Token {
        self.token.clone()
    }

    fn authorize_library_url(&self) -> String {
        let redirect_uri = self.hints.get("redirect_uri").cloned().unwrap_or_default();
        format!("{redirect_uri}/{}/login", self.name)
    }

    async fn exchange_code(&self, code: &str) -> Result<Token, CoreError> {
        Ok(Token::non_oauth(code))
    }

    async fn refresh(&self) -> Result<Token, CoreError> {
        if self.root.exists() {
            Ok(self.token.clone())
        } else {
            Err(CoreError::auth(format!(
                "local root no longer exists: {}",
                self.root.display()
            )))
        }
    }

    async fn list_directory_page(&self, dir: &Item, _page_token: &str) -> Result<ListPage, CoreError> {
        let path = self.path_for(dir);
        let items = self
            .thread_pool
            .schedule(move || -> Result<Vec<Item>, CoreError> {
                let mut items = Vec::new();
                for entry in std::fs::read_dir(&path)? {
                    let entry = entry?;
                    let metadata = entry.metadata()?;
                    items.push(LocalProvider::item_for_path(&entry.path(), &metadata)?);
                }
                Ok(items)
            })
            .await??;
        Ok(ListPage {
            items,
            next_token: String::new(),
        })
    }

    async fn get_item_data(&self, id: &ItemId) -> Result<Item, CoreError> {
        let path = PathBuf::from(id.as_str());
        self.thread_pool
            .schedule(move || -> Result<Item, CoreError> {
                let metadata = std::fs::metadata(&path)?;
                LocalProvider::item_for_path(&path, &metadata)
            })
            .await?
    }

    async fn get_file_url(&self, item: &Item) -> Result<String, CoreError> {
        Ok(format!("file://{}", self.path_for(item).display()))
    }

    async fn download_file(
        &self,
        item: &Item,
        range: Range,
        sink: &mut (dyn DownloadSink + '_),
    ) -> Result<(), CoreError> {
        let path = self.path_for(item);
        let mut file = tokio::fs::File::open(&path).await?;
        let metadata = file.metadata().await?;
        let Some((start, size)) = range.clamp(metadata.len()) else {
            return Ok(());
        };
        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start)).await?;
        }

        let mut remaining = size;
        let total = Some(size);
        let mut now = 0u64;
        let mut buf = vec![0u8; READ_CHUNK];
        while remaining > 0 {
            let to_read = (buf.len() as u64).min(remaining) as usize;
            let read = file.read(&mut buf[..to_read]).await?;
            if read == 0 {
                break;
            }
            sink.received_data(&buf[..read])?;
            now += read as u64;
            sink.progress(total, now);
            remaining -= read as u64;
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        parent: &Item,
        filename: &str,
        source: &mut (dyn UploadSource + '_),
    ) -> Result<Item, CoreError> {
        self.require_read_write("upload_file")?;
        let path = self.path_for(parent).join(filename);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut offset = 0u64;
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let read = source.put_data(&mut buf, offset)?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read]).await?;
            offset += read as u64;
        }
        file.flush().await?;
        let metadata = std::fs::metadata(&path)?;
        LocalProvider::item_for_path(&path, &metadata)
    }

    async fn mkdir(&self, parent: &Item, name: &str) -> Result<Item, CoreError> {
        self.require_read_write("mkdir")?;
        let path = self.path_for(parent).join(name);
        std::fs::create_dir(&path)?;
        let metadata = std::fs::metadata(&path)?;
        LocalProvider::item_for_path(&path, &metadata)
    }

    async fn delete(&self, item: &Item) -> Result<(), CoreError> {
        self.require_read_write("delete")?;
        let path = self.path_for(item);
        if item.item_type.is_directory() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    async fn move_item(&self, item: &Item, new_parent: &Item) -> Result<Item, CoreError> {
        self.require_read_write("move_item")?;
        let from = self.path_for(item);
        let to = self.path_for(new_parent).join(&item.filename);
        std::fs::rename(&from, &to)?;
        let metadata = std::fs::metadata(&to)?;
        LocalProvider::item_for_path(&to, &metadata)
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item, CoreError> {
        self.require_read_write("rename")?;
        let from = self.path_for(item);
        let to = from
            .parent()
            .map(|p| p.join(new_name))
            .unwrap_or_else(|| PathBuf::from(new_name));
        std::fs::rename(&from, &to)?;
        let metadata = std::fs::metadata(&to)?;
        LocalProvider::item_for_path(&to, &metadata)
    }

    async fn get_thumbnail(&self, _item: &Item) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::unimplemented("get_thumbnail"))
    }

    async fn general_data(&self) -> Result<GeneralData, CoreError> {
        // The local filesystem has no account/quota concept in the uniform
        // model; zero denotes "not applicable" rather than "full".
        Ok(GeneralData {
            username: "local".to_string(),
            space_used: 0,
            space_total: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhub_core::domain::Permission;
    use std::collections::HashMap;

    fn provider(root: PathBuf) -> LocalProvider {
        LocalProvider::new(
            "local",
            root,
            HashMap::new(),
            Permission::ReadWrite,
            Token::non_oauth("local"),
            Arc::new(ThreadPool::new(1)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn lists_and_reads_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
        let provider = provider(dir.path().to_path_buf());

        let root = provider.root_directory();
        let items = provider.list_directory(&root).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].filename, "a.txt");
        assert_eq!(items[0].size, MaybeKnown::Known(11));
    }

    #[tokio::test]
    async fn mkdir_then_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path().to_path_buf());
        let root = provider.root_directory();

        let created = provider.mkdir(&root, "sub").await.unwrap();
        assert!(created.item_type.is_directory());
        provider.delete(&created).await.unwrap();
        assert!(!dir.path().join("sub").exists());
    }

    #[tokio::test]
    async fn read_only_provider_rejects_mkdir() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(
            "local",
            dir.path().to_path_buf(),
            HashMap::new(),
            Permission::ReadOnly,
            Token::non_oauth("local"),
            Arc::new(ThreadPool::new(1)),
        )
        .unwrap();
        let root = provider.root_directory();
        let err = provider.mkdir(&root, "sub").await.unwrap_err();
        assert!(err.is_kind(cloudhub_core::domain::ErrorKind::Http));
        assert_eq!(err.code, 503);
    }
}
