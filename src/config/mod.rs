//! Configuration management for Stratum

pub mod schema;

pub use schema::Config;

use crate::error::{StratumError, StratumResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Locates, loads and writes the TOML configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Use `path` when given (`--config` / `STRATUM_CONFIG`), else the default location
    pub fn resolve(path: Option<PathBuf>) -> Self {
        Self {
            config_path: path.unwrap_or_else(Self::default_config_path),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// `~/.config/stratum/config.toml` on Linux
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stratum")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load and validate the configuration; a missing file yields defaults
    pub async fn load(&self) -> StratumResult<Config> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", self.config_path.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(StratumError::io(
                    format!("reading config from {}", self.config_path.display()),
                    e,
                ))
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| self.invalid(e.to_string()))?;
        config.validate().map_err(|reason| self.invalid(reason))?;
        debug!("Loaded config from {}", self.config_path.display());
        Ok(config)
    }

    /// Write `config`, creating the parent directory.
    ///
    /// The file is written next to its destination and renamed into place.
    pub async fn save(&self, config: &Config) -> StratumResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StratumError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        let staging = self.config_path.with_extension("toml.new");
        fs::write(&staging, content)
            .await
            .map_err(|e| StratumError::io(format!("writing {}", staging.display()), e))?;
        fs::rename(&staging, &self.config_path).await.map_err(|e| {
            StratumError::io(format!("replacing {}", self.config_path.display()), e)
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    fn invalid(&self, reason: String) -> StratumError {
        StratumError::ConfigInvalid {
            path: self.config_path.clone(),
            reason,
        }
    }
}
