//! cloudhub CLI - command-line client for the cloudhub storage library
//!
//! Drives every registered provider through one `clap`-derived surface:
//! authorization, directory listing, file transfer, and account
//! maintenance, matching SPEC_FULL.md §14.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod provider_ctx;

use commands::accounts::AccountsCommand;
use commands::auth::AuthCommand;
use commands::completions::CompletionsCommand;
use commands::config::ConfigCommand;
use commands::get::GetCommand;
use commands::ls::LsCommand;
use commands::mkdir::MkdirCommand;
use commands::mv::MvCommand;
use commands::put::PutCommand;
use commands::quota::QuotaCommand;
use commands::rm::RmCommand;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "cloudhub", version, about = "Uniform command-line access to cloud storage providers")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Authentication commands
    #[command(subcommand)]
    Auth(AuthCommand),
    /// List a directory's contents
    Ls(LsCommand),
    /// Download a file
    Get(GetCommand),
    /// Upload a file
    Put(PutCommand),
    /// Create a directory
    Mkdir(MkdirCommand),
    /// Delete a file or directory
    Rm(RmCommand),
    /// Move and/or rename a file or directory
    Mv(MvCommand),
    /// Show account quota and identity
    Quota(QuotaCommand),
    /// Manage persisted account credentials
    #[command(subcommand)]
    Accounts(AccountsCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Some(path) = &cli.config {
        std::env::set_var("CLOUDHUB_CONFIG_PATH", path);
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Auth(cmd) => cmd.execute(format).await,
        Commands::Ls(cmd) => cmd.execute(format).await,
        Commands::Get(cmd) => cmd.execute(format).await,
        Commands::Put(cmd) => cmd.execute(format).await,
        Commands::Mkdir(cmd) => cmd.execute(format).await,
        Commands::Rm(cmd) => cmd.execute(format).await,
        Commands::Mv(cmd) => cmd.execute(format).await,
        Commands::Quota(cmd) => cmd.execute(format).await,
        Commands::Accounts(cmd) => cmd.execute(format).await,
        Commands::Config(cmd) => cmd.execute(format).await,
        Commands::Completions(cmd) => cmd.execute(format).await,
    }
}
