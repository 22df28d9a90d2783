//! Simulator configuration
//!
//! The `[updater]` table is the updater's own configuration; `[board]`
//! describes the simulated hardware.

use std::path::Path;

use serde::{Deserialize, Serialize};

use fwupdater_session::{ConfigError, UpdaterConfig};

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub updater: UpdaterConfig,
}

/// Simulated hardware
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Panel flash page size in bytes
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Panel flash page count
    #[serde(default = "default_pages")]
    pub pages: u32,
    /// Readiness checks the wireless module stays busy after an upload starts
    #[serde(default = "default_busy_checks")]
    pub wireless_busy_checks: u32,
    /// Create missing firmware images in the image directory
    #[serde(default)]
    pub generate_images: bool,
    /// Size of a generated panel image
    #[serde(default = "default_image_bytes")]
    pub image_bytes: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            pages: default_pages(),
            wireless_busy_checks: default_busy_checks(),
            generate_images: false,
            image_bytes: default_image_bytes(),
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board.page_size == 0 || self.board.pages == 0 {
            return Err(ConfigError::Invalid(
                "board.page_size and board.pages must be greater than zero".to_string(),
            ));
        }
        self.updater.validate()
    }
}

fn default_page_size() -> u32 {
    256
}

fn default_pages() -> u32 {
    64
}

fn default_busy_checks() -> u32 {
    10
}

fn default_image_bytes() -> u32 {
    9000
}
