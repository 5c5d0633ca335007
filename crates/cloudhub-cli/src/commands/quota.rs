//! `cloudhub quota <provider>`.

use anyhow::{Context, Result};
use cloudhub_core::ports::cloud_provider::CloudProvider;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

#[derive(Debug, clap::Args)]
pub struct QuotaCommand {
    pub provider: String,
}

impl QuotaCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = provider_ctx::load_config();
        let provider = provider_ctx::load_provider(&self.provider, &config)?;

        let data = provider.general_data().await.context("fetching quota")?;

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "username": data.username,
                "space_used": data.space_used,
                "space_total": data.space_total,
            }));
        } else {
            formatter.success(&format!("Account: {}", data.username));
            formatter.info(&format!("Used:  {} bytes", data.space_used));
            formatter.info(&format!("Total: {} bytes", data.space_total));
        }
        Ok(())
    }
}
