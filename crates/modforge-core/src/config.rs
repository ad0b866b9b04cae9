use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use modforge_util::errors::ModforgeError;

pub const DEFAULT_REGISTRY_URL: &str = "https://api.modrinth.com/v2";

/// Global user configuration loaded from `~/.modforge/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Registry settings from `[registry]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs", rename = "timeout-secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent", rename = "max-concurrent-fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_user_agent", rename = "user-agent")]
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent(),
            user_agent: default_user_agent(),
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    8
}

fn default_user_agent() -> String {
    format!("modforge/{}", env!("CARGO_PKG_VERSION"))
}

impl GlobalConfig {
    /// Load the global configuration from `~/.modforge/config.toml`, or return defaults if the file doesn't exist.
    pub fn load() -> miette::Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> miette::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ModforgeError::Config {
            message: format!("Failed to read global config: {e}"),
        })?;
        toml::from_str(&content).map_err(|e| {
            ModforgeError::Config {
                message: format!("Failed to parse global config: {e}"),
            }
            .into()
        })
    }

    /// Returns the default path to the global config file.
    pub fn default_path() -> PathBuf {
        dirs_path().join("config.toml")
    }
}

/// Returns the path to the Modforge data directory (`~/.modforge/`).
pub fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".modforge")
}
