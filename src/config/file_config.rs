//! Configuration file support for pkgsearch.
//!
//! This module locates, reads and writes the TOML configuration file.
//!
//! # Configuration File Format
//!
//! ```toml
//! [[sources]]
//! id = "nuget.org"
//! kind = "nuget"
//! endpoint = "https://api.nuget.org/v3/index.json"
//!
//! [[sources]]
//! id = "local"
//! kind = "local"
//! endpoint = "/srv/packages"
//! enabled = true
//!
//! [loader]
//! page_size = 25
//! include_prerelease = false
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 500
//! max_delay_ms = 10000
//! backoff_multiplier = 2.0
//!
//! [rate_limits]
//! default_requests_per_second = 5.0
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Source order in the file is merge precedence: when two sources report the
//! same package version, the copy from the source listed first is kept.

use std::path::{Path, PathBuf};

use super::Config;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "pkgsearch.toml";

/// A configuration read from (or destined for) a file
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Where the configuration lives
    pub path: PathBuf,

    /// Parsed configuration
    pub config: Config,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;

        let config = toml::from_str(&content).map_err(|e| ConfigFileError::Parse(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Save configuration to its TOML file
    pub fn save(&self) -> Result<(), ConfigFileError> {
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        }
        std::fs::write(&self.path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
    }

    /// Default configuration bound to `path`
    pub fn create_default(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Config::default(),
        }
    }
}

/// Default location in the user's config directory
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pkgsearch").join("config.toml"))
}

/// Find a configuration file: `./pkgsearch.toml` first, then the user config directory
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }

    user_config_path().filter(|p| p.is_file())
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
