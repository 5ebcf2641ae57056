use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_media_url")]
    pub media_url: String,

    #[serde(default = "default_media_fallback_url")]
    pub media_fallback_url: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Adds the page's cover image to the archive as `cover.<ext>`.
    #[serde(default = "default_true")]
    pub include_cover: bool,

    #[serde(default = "default_compression_level")]
    pub compression_level: i64,

    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_media_url() -> String {
    "https://files01.tokybook.com/audio/".to_string()
}
fn default_media_fallback_url() -> String {
    "https://files02.tokybook.com/audio/".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_true() -> bool {
    true
}
fn default_compression_level() -> i64 {
    6
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media_url: default_media_url(),
            media_fallback_url: default_media_fallback_url(),
            output_folder: default_output(),
            include_cover: true,
            compression_level: default_compression_level(),
            user_agent: None,
        }
    }
}

impl Config {
    /// Loads the YAML config at `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    /// Deflate level in the range the zip writer accepts.
    pub fn compression_level(&self) -> i64 {
        self.compression_level.clamp(1, 9)
    }
}
