//! `cloudhub mkdir <provider> <parent> <name>`.

use anyhow::{Context, Result};
use cloudhub_core::ports::cloud_provider::CloudProvider;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct MkdirCommand {
    pub provider: String,
    pub parent: String,
    pub name: String,
}

impl MkdirCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let parent = provider.get_item(&self.parent).await.context("resolving parent")?;
        let item = provider.mkdir(&parent, &self.name).await.context("creating directory")?;

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "id": item.id.as_str(),
                "filename": item.filename,
            }));
        } else {
            formatter.success(&format!("Created directory {}", item.filename));
        }
        Ok(())
    }
}
