//! Config command - view and edit the cloudhub configuration file.
//!
//! Provides the `cloudhub config` CLI command which:
//! 1. Shows the current configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "cache.read_ahead_bytes")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(format).await,
            ConfigCommand::Set { key, value } => self.execute_set(key, value, format).await,
            ConfigCommand::Validate => self.execute_validate(format).await,
        }
    }

    async fn execute_show(&self, format: OutputFormat) -> Result<()> {
        use cloudhub_core::config::Config;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Config::default_path();
        let config = Config::load_or_default(&config_path);

        info!(config_path = %config_path.display(), "Showing configuration");

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", config_path.display()));
            formatter.info("");

            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;

            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    async fn execute_set(&self, key: &str, value: &str, format: OutputFormat) -> Result<()> {
        use cloudhub_core::config::Config;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Config::default_path();
        let mut config = Config::load_or_default(&config_path);

        info!(key = %key, value = %value, "Setting configuration value");

        match apply_config_value(&mut config, key, value) {
            Ok(()) => {
                let errors = config.validate();
                if !errors.is_empty() {
                    let error_msgs: Vec<String> = errors
                        .iter()
                        .map(|e| format!("{}: {}", e.field, e.message))
                        .collect();

                    if matches!(format, OutputFormat::Json) {
                        formatter.print_json(&serde_json::json!({
                            "success": false,
                            "key": key,
                            "value": value,
                            "errors": error_msgs,
                        }));
                    } else {
                        formatter.error(&format!(
                            "Invalid value for '{}': {}",
                            key,
                            error_msgs.join("; ")
                        ));
                    }
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create configuration directory")?;
                }

                let yaml =
                    serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
                std::fs::write(&config_path, &yaml)
                    .context("Failed to write configuration file")?;

                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "key": key,
                        "value": value,
                        "config_path": config_path.display().to_string(),
                    }));
                } else {
                    formatter.success(&format!("Set {} = {}", key, value));
                    formatter.info(&format!("Saved to {}", config_path.display()));
                }
            }
            Err(e) => {
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "success": false,
                        "key": key,
                        "value": value,
                        "error": e.to_string(),
                    }));
                } else {
                    formatter.error(&format!("Failed to set '{}': {}", key, e));
                    formatter.info("");
                    formatter.info("Supported keys:");
                    formatter.info("  runtime.thread_pool_workers  - Blocking-work worker count");
                    formatter.info("  runtime.cancel_pool_workers  - Cancellation-pool worker count");
                    formatter.info("  cache.cached_chunk_count     - Cached chunks per open item");
                    formatter.info("  cache.read_ahead_bytes       - Read-ahead window in bytes");
                    formatter.info("  oauth.redirect_uri           - Loopback OAuth redirect URI");
                    formatter.info("  logging.level                - trace|debug|info|warn|error");
                    formatter.info("  logging.file                 - Log file path");
                }
            }
        }

        Ok(())
    }

    async fn execute_validate(&self, format: OutputFormat) -> Result<()> {
        use cloudhub_core::config::Config;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Config::default_path();

        let config = match Config::load(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                if !config_path.exists() {
                    if matches!(format, OutputFormat::Json) {
                        formatter.print_json(&serde_json::json!({
                            "valid": false,
                            "config_path": config_path.display().to_string(),
                            "errors": ["Configuration file not found. Using defaults."],
                        }));
                    } else {
                        formatter.info(&format!(
                            "Configuration file not found at {}",
                            config_path.display()
                        ));
                        formatter.info("Using default configuration. Run 'cloudhub config set <key> <value>' to create one.");
                    }
                    return Ok(());
                }

                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {}", e)],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {}", e));
                    formatter.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "Validating configuration");

        let errors = config.validate();

        if matches!(format, OutputFormat::Json) {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }
}

/// Applies a dot-notation key/value pair to a [`cloudhub_core::config::Config`].
fn apply_config_value(
    config: &mut cloudhub_core::config::Config,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "runtime.thread_pool_workers" => {
            config.runtime.thread_pool_workers = value
                .parse::<u32>()
                .context("Expected a positive integer for runtime.thread_pool_workers")?;
        }
        "runtime.cancel_pool_workers" => {
            config.runtime.cancel_pool_workers = value
                .parse::<u32>()
                .context("Expected a positive integer for runtime.cancel_pool_workers")?;
        }
        "cache.cached_chunk_count" => {
            config.cache.cached_chunk_count = value
                .parse::<usize>()
                .context("Expected a positive integer for cache.cached_chunk_count")?;
        }
        "cache.read_ahead_bytes" => {
            config.cache.read_ahead_bytes = value
                .parse::<u64>()
                .context("Expected a positive integer for cache.read_ahead_bytes")?;
        }
        "oauth.redirect_uri" => {
            config.oauth.redirect_uri = value.to_string();
        }
        "logging.level" => {
            config.logging.level = value.to_string();
        }
        "logging.file" => {
            config.logging.file = if value.is_empty() { None } else { Some(PathBuf::from(value)) };
        }
        _ => {
            anyhow::bail!("Unknown configuration key: '{}'", key);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhub_core::config::Config;

    #[test]
    fn test_apply_runtime_thread_pool_workers() {
        let mut config = Config::default();
        apply_config_value(&mut config, "runtime.thread_pool_workers", "4").unwrap();
        assert_eq!(config.runtime.thread_pool_workers, 4);
    }

    #[test]
    fn test_apply_cache_read_ahead_bytes() {
        let mut config = Config::default();
        apply_config_value(&mut config, "cache.read_ahead_bytes", "1048576").unwrap();
        assert_eq!(config.cache.read_ahead_bytes, 1_048_576);
    }

    #[test]
    fn test_apply_oauth_redirect_uri() {
        let mut config = Config::default();
        apply_config_value(&mut config, "oauth.redirect_uri", "http://127.0.0.1:9999").unwrap();
        assert_eq!(config.oauth.redirect_uri, "http://127.0.0.1:9999");
    }

    #[test]
    fn test_apply_logging_level() {
        let mut config = Config::default();
        apply_config_value(&mut config, "logging.level", "debug").unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_apply_logging_file() {
        let mut config = Config::default();
        apply_config_value(&mut config, "logging.file", "/var/log/cloudhub.log").unwrap();
        assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/cloudhub.log")));
    }

    #[test]
    fn test_apply_logging_file_empty_clears() {
        let mut config = Config::default();
        config.logging.file = Some(PathBuf::from("/var/log/cloudhub.log"));
        apply_config_value(&mut config, "logging.file", "").unwrap();
        assert_eq!(config.logging.file, None);
    }

    #[test]
    fn test_apply_unknown_key_fails() {
        let mut config = Config::default();
        let result = apply_config_value(&mut config, "unknown.key", "value");
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_invalid_u32_fails() {
        let mut config = Config::default();
        let result = apply_config_value(&mut config, "runtime.thread_pool_workers", "not_a_number");
        assert!(result.is_err());
    }
}
