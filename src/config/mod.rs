//! Configuration file and directory layout

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::oauth::DEFAULT_CALLBACK_PORT;

/// Keys accepted by `config get` / `config set`.
pub const KEYS: &[&str] = &["oauth_port"];

/// Application configuration
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Port for the local OAuth callback listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_port: Option<u16>,
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "raindrop", "raindrop-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory holding the encrypted file keyring
    pub fn keyring_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("keyring"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn oauth_port(&self) -> u16 {
        self.oauth_port.unwrap_or(DEFAULT_CALLBACK_PORT)
    }

    /// Effective value of `key`, defaults included.
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            "oauth_port" => Ok(self.oauth_port().to_string()),
            _ => bail!("unknown config key: {} (known: {})", key, KEYS.join(", ")),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "oauth_port" => {
                let port: u16 = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid port: {}", value))?;
                if port == 0 {
                    bail!("invalid port: {}", value);
                }
                self.oauth_port = Some(port);
            }
            _ => bail!("unknown config key: {} (known: {})", key, KEYS.join(", ")),
        }
        Ok(())
    }
}
