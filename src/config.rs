//! Configuration
//!
//! Engine and node settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detection::{OEM_TESSERACT_ONLY, OSD_LANGUAGE};
use crate::pipeline::{DEFAULT_BINARY_PROPERTY, FailureMode};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OSD engine settings
    pub engine: EngineConfig,
    /// Batch processing settings
    pub node: NodeConfig,
}

/// OSD engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path or name of the tesseract executable
    pub binary: PathBuf,
    /// Directory holding `*.traineddata` files, if not the engine default
    pub tessdata_dir: Option<PathBuf>,
    /// Language pack used for detection
    pub language: String,
    /// OCR engine mode passed as `--oem`
    pub engine_mode: u8,
    /// Per-image detection timeout; unset means wait indefinitely
    pub detect_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            tessdata_dir: None,
            language: OSD_LANGUAGE.to_string(),
            engine_mode: OEM_TESSERACT_ONLY,
            detect_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn detect_timeout(&self) -> Option<Duration> {
        self.detect_timeout_secs.map(Duration::from_secs)
    }
}

/// Batch processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Binary property holding the image on each item
    pub binary_property_name: String,
    /// Record per-item failures instead of aborting the batch
    pub continue_on_fail: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary_property_name: DEFAULT_BINARY_PROPERTY.to_string(),
            continue_on_fail: false,
        }
    }
}

impl NodeConfig {
    pub fn failure_mode(&self) -> FailureMode {
        FailureMode::from_continue_on_fail(self.continue_on_fail)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Location of `config.toml` in the platform configuration directory
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("org", "imgorient", "imgorient")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load the default config file if there is one, otherwise use defaults
pub fn load_or_default() -> Result<AppConfig> {
    match default_config_path() {
        Ok(path) if path.exists() => load_config(&path),
        _ => Ok(AppConfig::default()),
    }
}
