//! Configuration schema for Stratum
//!
//! Configuration is stored at `~/.config/stratum/config.toml`

use crate::fs::MODE_MASK;
use crate::image::ExtractOptions;
use crate::overlay::CachePattern;
use crate::secrets::SecretSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build execution settings
    pub build: BuildConfig,

    /// Layer cache settings
    pub cache: CacheConfig,
}

impl Config {
    /// Reject values that parse but cannot be used
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "general.log_format must be \"text\" or \"json\", got \"{}\"",
                self.general.log_format
            ));
        }
        for (name, mode) in [
            ("build.secret_dir_mode", self.build.secret_dir_mode),
            ("build.secret_file_mode", self.build.secret_file_mode),
        ] {
            if mode > MODE_MASK {
                return Err(format!("{} {:#o} has bits outside {:#o}", name, mode, MODE_MASK));
            }
        }
        for (name, path) in [
            ("build.root_dir", &self.build.root_dir),
            ("build.secrets_dir", &self.build.secrets_dir),
            ("build.workdir", &self.build.workdir),
        ] {
            if !path.is_absolute() {
                return Err(format!("{} must be absolute: {}", name, path.display()));
            }
        }
        for pattern in &self.cache.patterns {
            CachePattern::new(pattern).map_err(|e| format!("cache.patterns: {}", e))?;
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Build execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Working root cached layers are extracted onto
    pub root_dir: PathBuf,

    /// Apply tar uid/gid when extracting (requires privileges)
    pub preserve_ownership: bool,

    /// Default directory for secret mounts
    pub secrets_dir: PathBuf,

    /// Mode for directories created for secret mounts
    pub secret_dir_mode: u32,

    /// Mode for secret files
    pub secret_file_mode: u32,

    /// Working directory relative secret targets resolve against
    pub workdir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/"),
            preserve_ownership: true,
            secrets_dir: PathBuf::from("/run/secrets"),
            secret_dir_mode: 0o700,
            secret_file_mode: 0o600,
            workdir: PathBuf::from("/"),
        }
    }
}

impl BuildConfig {
    /// Extraction settings for cached steps
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            preserve_ownership: self.preserve_ownership,
            include_whiteouts: true,
        }
    }

    /// Where secret mounts are written
    pub fn secret_settings(&self) -> SecretSettings {
        SecretSettings {
            secrets_dir: self.secrets_dir.clone(),
            workdir: self.workdir.clone(),
            dir_mode: self.secret_dir_mode,
            file_mode: self.secret_file_mode,
        }
    }
}

/// Layer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the layer cache (default: true)
    pub enabled: bool,

    /// Local layer store directory
    pub dir: PathBuf,

    /// Treat layers older than N hours as misses (0 = never expire)
    pub ttl_hours: u64,

    /// Default patterns of image files to hash when mounting a root
    pub patterns: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stratum")
                .join("layers"),
            ttl_hours: 336,
            patterns: Vec::new(),
        }
    }
}
