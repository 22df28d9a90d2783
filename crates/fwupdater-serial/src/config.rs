//! Serial link configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Auxiliary serial port settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name as known to the platform (e.g. "aux0", "/dev/ttyS1")
    #[serde(default = "default_device")]
    pub device: String,
    /// Line rate the platform opens the port with
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-call read/write timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Flush after every write
    #[serde(default)]
    pub auto_flush: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            auto_flush: false,
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_device() -> String {
    "aux0".to_string()
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: SerialConfig = toml::from_str("device = \"/dev/ttyS1\"").unwrap();
        assert_eq!(config.device, "/dev/ttyS1");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert!(!config.auto_flush);
    }
}
