//! example-panel - Firmware update simulator
//!
//! Wires the module dispatcher to a simulated panel sub-board (reached through
//! a real UART transport over an in-memory stream) and a simulated wireless
//! co-processor, so the update flow can be exercised without hardware.
//!
//! # Modules
//!
//! - [`config`] - Simulator configuration (board layout plus updater settings)
//! - [`link`] - Panel link with a simulated boot ROM on the far end

pub mod config;
pub mod link;

use std::path::Path;

use tracing::info;

pub use config::{BoardConfig, SimConfig};
pub use link::DuplexPanelLink;

/// Deterministic stand-in for a firmware image
pub fn synthetic_image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

/// Write any image named in `config` that is missing from `root/sys_dir`
pub fn ensure_images(root: &Path, config: &SimConfig) -> std::io::Result<()> {
    let dir = root.join(&config.updater.sys_dir);
    std::fs::create_dir_all(&dir)?;

    let images = [
        (
            &config.updater.panel.firmware_file,
            config.board.image_bytes as usize,
            0x5A,
        ),
        (&config.updater.wireless.firmware_file, 4096, 0xE9),
    ];
    for (name, len, seed) in images {
        let path = dir.join(name);
        if !path.exists() {
            std::fs::write(&path, synthetic_image(len, seed))?;
            info!(path = %path.display(), bytes = len, "Generated firmware image");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_images_keeps_existing_files() {
        let root = tempfile::tempdir().unwrap();
        let config = SimConfig::default();
        std::fs::create_dir_all(root.path().join("sys")).unwrap();
        std::fs::write(root.path().join("sys/PanelFirmware.bin"), [7u8; 3]).unwrap();

        ensure_images(root.path(), &config).unwrap();
        assert_eq!(
            std::fs::read(root.path().join("sys/PanelFirmware.bin")).unwrap(),
            vec![7, 7, 7]
        );
        assert_eq!(
            std::fs::read(root.path().join("sys/WirelessServer.bin"))
                .unwrap()
                .len(),
            4096
        );
    }
}
