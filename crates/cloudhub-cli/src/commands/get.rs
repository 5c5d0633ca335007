//! `cloudhub get <provider> <path> <dest>`.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cloudhub_core::domain::{CoreError, Range};
use cloudhub_core::ports::cloud_provider::{CloudProvider, DownloadSink};

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct GetCommand {
    pub provider: String,
    pub path: String,
    pub dest: PathBuf,
}

struct FileSink {
    file: File,
}

impl DownloadSink for FileSink {
    fn received_data(&mut self, chunk: &[u8]) -> Result<(), CoreError> {
        self.file
            .write_all(chunk)
            .map_err(|e| CoreError::transport(e.to_string()))
    }
}

impl GetCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let item = provider.get_item(&self.path).await.context("resolving path")?;
        let file = File::create(&self.dest)
            .with_context(|| format!("creating {}", self.dest.display()))?;
        let mut sink = FileSink { file };
        provider
            .download_file(&item, Range::from_start(0), &mut sink)
            .await
            .context("downloading file")?;

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "path": self.path,
                "dest": self.dest.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Downloaded {} to {}", self.path, self.dest.display()));
        }
        Ok(())
    }
}
