//! `cloudhub mv <provider> <path> <new-parent> [--rename <name>]`.

use anyhow::{Context, Result};
use cloudhub_core::ports::cloud_provider::CloudProvider;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct MvCommand {
    pub provider: String,
    pub path: String,
    pub new_parent: String,
    /// Also rename the item after moving it.
    #[arg(long)]
    pub rename: Option<String>,
}

impl MvCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let item = provider.get_item(&self.path).await.context("resolving path")?;
        let new_parent = provider
            .get_item(&self.new_parent)
            .await
            .context("resolving destination parent")?;

        let mut moved = provider.move_item(&item, &new_parent).await.context("moving item")?;
        if let Some(name) = &self.rename {
            moved = provider.rename(&moved, name).await.context("renaming item")?;
        }

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "id": moved.id.as_str(),
                "filename": moved.filename,
            }));
        } else {
            formatter.success(&format!("Moved to {}", moved.filename));
        }
        Ok(())
    }
}
