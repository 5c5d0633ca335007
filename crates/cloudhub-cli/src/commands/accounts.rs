//! `cloudhub accounts dump` / `cloudhub accounts load` (SPEC_FULL.md §11.3).

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use cloudhub_core::domain::Permission;
use cloudhub_core::ports::cloud_provider::CloudProvider;
use cloudhub_http::ReqwestEngine;
use cloudhub_providers::accounts::{dump_accounts, load_accounts};
use cloudhub_providers::common::InitData;
use cloudhub_providers::factory::create_provider;
use cloudhub_runtime::ThreadPool;

use crate::output::{get_formatter, OutputFormat};
use crate::provider_ctx;

/// Every name [`create_provider`] recognizes, checked in turn for a stored
/// token when dumping every logged-in account at once.
const KNOWN_PROVIDERS: &[&str] = &[
    "google", "onedrive", "dropbox", "box", "amazons3", "hubic", "mega", "webdav", "yandex",
    "pcloud", "gphotos", "4shared", "local", "localwinrt",
];

#[derive(Debug, Subcommand)]
pub enum AccountsCommand {
    /// Write every logged-in provider's tokens to a file, one JSON object per line.
    Dump { path: PathBuf },
    /// Read a dump file and store its tokens back into the keyring.
    Load { path: PathBuf },
}

impl AccountsCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            AccountsCommand::Dump { path } => execute_dump(path, format).await,
            AccountsCommand::Load { path } => execute_load(path, format).await,
        }
    }
}

async fn execute_dump(path: &PathBuf, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));
    let config = provider_ctx::load_config();

    let mut providers: Vec<Arc<dyn CloudProvider>> = Vec::new();
    for name in KNOWN_PROVIDERS {
        if let Ok(provider) = provider_ctx::load_provider(name, &config) {
            providers.push(provider);
        }
    }

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    dump_accounts(&providers, file).context("writing account dump")?;

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({"success": true, "count": providers.len()}));
    } else {
        formatter.success(&format!("Dumped {} account(s) to {}", providers.len(), path.display()));
    }
    Ok(())
}

async fn execute_load(path: &PathBuf, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));
    let config = provider_ctx::load_config();

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let providers = load_accounts(reader, |name, token| {
        let hints = provider_ctx::hints_for(name, &config);
        create_provider(
            name,
            InitData {
                token,
                hints,
                permission: Permission::ReadWrite,
                callback: None,
                http: Arc::new(ReqwestEngine::new()),
                thread_pool: Arc::new(ThreadPool::new(4)),
            },
        )
    })
    .context("reading account dump")?;

    for provider in &providers {
        provider_ctx::store_token(provider.name(), &provider.token())?;
    }

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({"success": true, "count": providers.len()}));
    } else {
        formatter.success(&format!("Loaded {} account(s) from {}", providers.len(), path.display()));
    }
    Ok(())
}
