//! `cloudhub rm <provider> <path>`.

use anyhow::{Context, Result};
use cloudhub_core::ports::cloud_provider::CloudProvider;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct RmCommand {
    pub provider: String,
    pub path: String,
}

impl RmCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let item = provider.get_item(&self.path).await.context("resolving path")?;
        provider.delete(&item).await.context("deleting item")?;

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({"success": true, "path": self.path}));
        } else {
            formatter.success(&format!("Deleted {}", self.path));
        }
        Ok(())
    }
}
