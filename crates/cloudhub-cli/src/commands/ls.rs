//! `cloudhub ls <provider> <path>`.

use anyhow::{Context, Result};
use cloudhub_core::domain::{Item, ItemType, MaybeKnown};
use cloudhub_core::ports::cloud_provider::CloudProvider;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct LsCommand {
    pub provider: String,
    #[arg(default_value = "/")]
    pub path: String,
}

impl LsCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let dir = provider.get_item(&self.path).await.context("resolving path")?;
        let items = provider.list_directory(&dir).await.context("listing directory")?;

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::Value::Array(items.iter().map(item_to_json).collect());
            formatter.print_json(&json);
        } else {
            for item in &items {
                formatter.info(&format_item_line(item));
            }
        }
        Ok(())
    }
}

fn format_item_line(item: &Item) -> String {
    let kind = if item.item_type.is_directory() { "d" } else { "-" };
    let size = match item.size {
        MaybeKnown::Known(n) => n.to_string(),
        MaybeKnown::Unknown => "-".to_string(),
    };
    format!("{kind} {size:>12} {}", item.filename)
}

fn item_to_json(item: &Item) -> serde_json::Value {
    serde_json::json!({
        "id": item.id.as_str(),
        "filename": item.filename,
        "type": item_type_label(item.item_type),
        "size": item.size.known(),
    })
}

fn item_type_label(kind: ItemType) -> &'static str {
    match kind {
        ItemType::File => "file",
        ItemType::Image => "image",
        ItemType::Audio => "audio",
        ItemType::Video => "video",
        ItemType::Directory => "directory",
        ItemType::Unknown => "unknown",
    }
}
