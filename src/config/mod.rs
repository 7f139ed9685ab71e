//! Configuration management.

pub mod file_config;

pub use file_config::{find_config_file, ConfigFile, ConfigFileError};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::sources::NUGET_ORG_INDEX;
use crate::utils::RetryConfig;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Package sources, in merge-precedence order
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Loader settings
    #[serde(default)]
    pub loader: LoaderSettings,

    /// Retry settings applied to every source
    #[serde(default)]
    pub retry: RetrySettings,

    /// Rate limiting settings
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            loader: LoaderSettings::default(),
            retry: RetrySettings::default(),
            rate_limits: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Enabled sources, in configuration order
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![SourceConfig {
        id: "nuget.org".to_string(),
        kind: SourceKind::NuGet,
        endpoint: NUGET_ORG_INDEX.to_string(),
        enabled: true,
    }]
}

/// Kind of package source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// NuGet V3 feed (service index or search URL)
    NuGet,
    /// Folder of `.nupkg` files
    Local,
}

/// A configured package source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source identifier
    pub id: String,

    /// Source kind
    pub kind: SourceKind,

    /// URL for NuGet feeds, directory path for local sources
    pub endpoint: String,

    /// Whether the source takes part in searches
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Results requested from each source per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Include prerelease versions unless the caller says otherwise
    #[serde(default)]
    pub include_prerelease: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            include_prerelease: false,
        }
    }
}

fn default_page_size() -> usize {
    25
}

fn default_true() -> bool {
    true
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts per page fetch (1 disables retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetrySettings {
    /// Convert to the retry policy used by [`RetryingSource`](crate::utils::RetryingSource)
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second for each HTTP source (0 disables limiting)
    #[serde(default = "default_rps")]
    pub default_requests_per_second: f32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_requests_per_second: default_rps(),
        }
    }
}

fn default_rps() -> f32 {
    5.0
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from a file, with `PKGSEARCH_*` environment overrides
pub fn load_config(path: &Path) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("PKGSEARCH").separator("__"))
        .build()?;

    settings.try_deserialize()
}

/// Get the default configuration
pub fn get_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].kind, SourceKind::NuGet);
        assert_eq!(config.loader.page_size, 25);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.rate_limits.default_requests_per_second, 5.0);
    }

    #[test]
    fn test_load_config_keeps_source_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkgsearch.toml");
        std::fs::write(
            &path,
            r#"
[[sources]]
id = "local"
kind = "local"
endpoint = "/srv/packages"

[[sources]]
id = "nuget.org"
kind = "nuget"
endpoint = "https://api.nuget.org/v3/index.json"
enabled = false

[loader]
page_size = 10
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let ids: Vec<_> = config.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["local", "nuget.org"]);
        assert_eq!(config.enabled_sources().count(), 1);
        assert_eq!(config.loader.page_size, 10);
        assert!(!config.loader.include_prerelease);
    }

    #[test]
    fn test_retry_settings_floor_attempts() {
        let settings = RetrySettings {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(settings.to_retry_config().max_attempts, 1);
    }
}
