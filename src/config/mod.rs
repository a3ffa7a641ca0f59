//! Application Configuration
//!
//! User settings and preferences stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::capture::CaptureConfig;
use crate::export::{ExportFormat, DEFAULT_FILE_NAME};
use crate::vision::RecognitionConfig;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera settings
    pub capture: CaptureConfig,
    /// Recognition parameters applied to every page
    pub recognition: RecognitionConfig,
    /// OCR engine settings
    pub engine: EngineSettings,
    /// Export settings
    pub export: ExportSettings,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tesseract executable
    pub tesseract_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
        }
    }
}

/// Export-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// File name used when none is given
    pub file_name: String,
    /// Document format
    pub format: ExportFormat,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            format: ExportFormat::Text,
        }
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "pagescanner", "PageScanner")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
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

/// Load configuration from `path` (or the default location), falling back to defaults
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Ok(p) => p,
            Err(_) => {
                info!("Using default configuration");
                return Ok(AppConfig::default());
            }
        },
    };

    if path.exists() {
        let config = load_config(&path)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
