//! Errors reported by the updater's collaborators

use thiserror::Error;

use crate::transport::TransportError;

/// Errors from the bootloader protocol client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootloaderError {
    /// Serial link failure underneath the protocol
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Nothing answered the handshake
    #[error("No response from bootloader")]
    NoResponse,

    /// Something answered, but not with the expected handshake
    #[error("Malformed handshake: {0}")]
    Handshake(String),

    /// Device id not in the client's device table
    #[error("Unsupported device: 0x{0:08X}")]
    UnsupportedDevice(u32),

    /// The device refused the command
    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Address range out of bounds: offset 0x{offset:X}, length {len}")]
    OutOfRange { offset: u32, len: u32 },

    /// Command issued before a successful connect/identify
    #[error("Not connected")]
    NotConnected,

    #[error("Timeout waiting for bootloader")]
    Timeout,
}

/// Errors from the wireless co-processor uploader
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WirelessError {
    #[error("Wireless uploader busy")]
    Busy,

    #[error("Failed to open update file: {0}")]
    File(String),

    #[error("Wireless module did not respond: {0}")]
    NoResponse(String),
}

/// Errors from firmware image storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File {0} not found")]
    NotFound(String),

    #[error("IO error reading {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
