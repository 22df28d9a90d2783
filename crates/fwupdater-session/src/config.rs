//! Updater configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file yields a
//! working configuration for the standard board layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fwupdater_serial::SerialConfig;

use crate::error::ConfigError;

/// Top-level updater configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Directory holding the firmware images
    #[serde(default = "default_sys_dir")]
    pub sys_dir: PathBuf,
    #[serde(default)]
    pub wireless: WirelessConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub serial: SerialConfig,
}

/// Wireless co-processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirelessConfig {
    /// False on boards without a wireless module; wireless requests are then skipped
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_wireless_file")]
    pub firmware_file: String,
    /// Flash address the image is written to on the co-processor
    #[serde(default)]
    pub firmware_address: u32,
}

/// Panel sub-board flashing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_panel_file")]
    pub firmware_file: String,
    /// Upper bound on a single bootloader call, in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Pages erased, written or verified per poll
    #[serde(default = "default_pages_per_poll")]
    pub pages_per_poll: u32,
    /// Extra attempts for a failed bootloader call before the phase fails
    #[serde(default = "default_io_retries")]
    pub io_retries: u32,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            sys_dir: default_sys_dir(),
            wireless: WirelessConfig::default(),
            panel: PanelConfig::default(),
            serial: SerialConfig::default(),
        }
    }
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            firmware_file: default_wireless_file(),
            firmware_address: 0,
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            firmware_file: default_panel_file(),
            io_timeout_ms: default_io_timeout_ms(),
            pages_per_poll: default_pages_per_poll(),
            io_retries: default_io_retries(),
        }
    }
}

impl PanelConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl UpdaterConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: UpdaterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panel.firmware_file.is_empty() {
            return Err(ConfigError::Invalid(
                "panel.firmware_file must not be empty".to_string(),
            ));
        }
        if self.wireless.enabled && self.wireless.firmware_file.is_empty() {
            return Err(ConfigError::Invalid(
                "wireless.firmware_file must not be empty".to_string(),
            ));
        }
        if self.panel.io_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "panel.io_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.panel.pages_per_poll == 0 {
            return Err(ConfigError::Invalid(
                "panel.pages_per_poll must be greater than zero".to_string(),
            ));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "serial.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_sys_dir() -> PathBuf {
    PathBuf::from("sys")
}

fn default_true() -> bool {
    true
}

fn default_wireless_file() -> String {
    "WirelessServer.bin".to_string()
}

fn default_panel_file() -> String {
    "PanelFirmware.bin".to_string()
}

fn default_io_timeout_ms() -> u64 {
    500
}

fn default_pages_per_poll() -> u32 {
    4
}

fn default_io_retries() -> u32 {
    2
}
