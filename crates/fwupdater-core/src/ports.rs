//! Collaborator traits
//!
//! The updater never reaches hardware or the filesystem directly. Everything
//! goes through these traits, which the containing firmware implements and
//! tests replace with fakes.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BootloaderError, StorageError, WirelessError};
use crate::transport::{SerialTransport, TransportError};

/// Flash layout reported by a sub-board bootloader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashDescriptor {
    /// Device name from the bootloader's device table
    pub name: String,
    /// Address of flash offset 0 in the device's memory map
    pub base_address: u32,
    /// Erase/write granularity in bytes
    pub page_size: u32,
    /// Number of pages in the region
    pub pages: u32,
}

impl FlashDescriptor {
    pub fn total_size(&self) -> u64 {
        self.page_size as u64 * self.pages as u64
    }
}

/// Bootloader protocol client for a sub-board
///
/// Every call performs a bounded amount of work so the caller can interleave
/// other duties between calls. Offsets are relative to the start of the
/// flash region.
#[async_trait]
pub trait BootloaderClient: Send {
    /// Take ownership of the serial link and perform the bootloader handshake
    async fn connect(&mut self, transport: Box<dyn SerialTransport>)
        -> Result<(), BootloaderError>;

    /// Query device identity and flash layout
    async fn identify(&mut self) -> Result<FlashDescriptor, BootloaderError>;

    /// Clear region lock bits so the flash can be erased
    async fn unlock(&mut self) -> Result<(), BootloaderError>;

    /// Erase `len` bytes starting at `offset`
    async fn erase(&mut self, offset: u32, len: u32) -> Result<(), BootloaderError>;

    /// Program `data` at `offset` (page aligned, whole pages)
    async fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), BootloaderError>;

    /// Read back `buf.len()` bytes from `offset`
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), BootloaderError>;

    /// Write post-flash configuration (boot-from-flash and lock bits)
    async fn write_options(&mut self) -> Result<(), BootloaderError>;

    /// Restart the device; it is expected to drop off the link
    async fn reset(&mut self) -> Result<(), BootloaderError>;
}

/// Uploader for the wireless co-processor firmware
///
/// The upload itself runs inside the uploader; callers start it and later
/// observe completion through [`WirelessUploader::is_ready`].
#[async_trait]
pub trait WirelessUploader: Send + Sync {
    /// True when no upload is in progress
    fn is_ready(&self) -> bool;

    /// Start sending `directory/file` to the co-processor at `address`
    async fn send_update_file(
        &self,
        file: &str,
        directory: &Path,
        address: u32,
    ) -> Result<(), WirelessError>;

    /// Reset the co-processor into its bootloader so an external tool can program it
    async fn reset_for_upload(&self, external: bool) -> Result<(), WirelessError>;
}

/// Firmware image storage
pub trait Storage: Send + Sync {
    fn file_exists(&self, directory: &Path, name: &str) -> bool;

    fn read_file(&self, directory: &Path, name: &str) -> Result<Vec<u8>, StorageError>;
}

/// Severity attached to operator messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Operator reporting channel
pub trait Reporter: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Source of the panel's serial link and bootloader client
///
/// Each panel session gets a freshly opened transport and a fresh client,
/// and drops both when it ends.
pub trait PanelLink: Send + Sync {
    fn open_transport(&self) -> Result<Box<dyn SerialTransport>, TransportError>;

    fn bootloader(&self) -> Box<dyn BootloaderClient>;
}
