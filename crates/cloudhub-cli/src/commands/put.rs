//! `cloudhub put <provider> <local-path> <remote-parent> <name>`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{Context, Result};
use cloudhub_core::ports::cloud_provider::{CloudProvider, UploadSource};

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct PutCommand {
    pub provider: String,
    pub local_path: PathBuf,
    pub remote_parent: String,
    pub name: String,
}

struct FileSource {
    file: File,
    size: u64,
}

impl UploadSource for FileSource {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn put_data(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read(buf)
    }
}

impl PutCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let parent = provider
            .get_item(&self.remote_parent)
            .await
            .context("resolving remote parent")?;
        let file = File::open(&self.local_path)
            .with_context(|| format!("opening {}", self.local_path.display()))?;
        let size = file.metadata()?.len();
        let mut source = FileSource { file, size };

        let item = provider
            .upload_file(&parent, &self.name, &mut source)
            .await
            .context("uploading file")?;

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "id": item.id.as_str(),
                "filename": item.filename,
            }));
        } else {
            formatter.success(&format!("Uploaded {} as {}", self.local_path.display(), item.filename));
        }
        Ok(())
    }
}
