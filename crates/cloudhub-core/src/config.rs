//! Configuration module for cloudhub.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, defaults, and a builder-friendly
//! `Default` per section (SPEC_FULL.md §11).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for cloudhub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub cache: CacheConfig,
    pub oauth: OAuthConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

/// Future/promise runtime sizing (SPEC_FULL.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker count for the blocking thread pool.
    pub thread_pool_workers: u32,
    /// Worker count for the dedicated cancellation pool (typically 1).
    pub cancel_pool_workers: u32,
}

/// Range-cache sizing (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Bounded number of cached chunks per open item.
    pub cached_chunk_count: usize,
    /// Read-ahead window in bytes.
    pub read_ahead_bytes: u64,
}

/// OAuth2/loopback-server defaults (SPEC_FULL.md §4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Default loopback redirect URI, e.g. `http://127.0.0.1:12345`.
    pub redirect_uri: String,
    pub login_page: Option<PathBuf>,
    pub success_page: Option<PathBuf>,
    pub error_page: Option<PathBuf>,
}

/// Per-provider overrides keyed by the exact provider name (SPEC_FULL.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// `endpoint` hint override, e.g. a WebDAV server URL or an
    /// S3-compatible host.
    pub endpoint: HashMap<String, String>,
    /// Scratch directory for upload spill buffers.
    pub temporary_directory: Option<PathBuf>,
    /// Base URL advertised to callers wanting a public media URL.
    pub file_url: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file path; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// `$XDG_CONFIG_HOME/cloudhub/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudhub")
            .join("config.yaml")
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_pool_workers: 1,
            cancel_pool_workers: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cached_chunk_count: 4,
            read_ahead_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            redirect_uri: "http://127.0.0.1:12345".to_string(),
            login_page: None,
            success_page: None,
            error_page: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"cache.cached_chunk_count"`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.runtime.thread_pool_workers == 0 {
            errors.push(ValidationError {
                field: "runtime.thread_pool_workers".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.runtime.cancel_pool_workers == 0 {
            errors.push(ValidationError {
                field: "runtime.cancel_pool_workers".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.cache.cached_chunk_count == 0 {
            errors.push(ValidationError {
                field: "cache.cached_chunk_count".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.cache.read_ahead_bytes == 0 {
            errors.push(ValidationError {
                field: "cache.read_ahead_bytes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn zero_cached_chunk_count_is_invalid() {
        let mut config = Config::default();
        config.cache.cached_chunk_count = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "cache.cached_chunk_count");
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.cache.cached_chunk_count, config.cache.cached_chunk_count);
    }
}
