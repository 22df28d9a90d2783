//! Serial transport trait used by bootloader protocol clients

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Serial transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open port: {0}")]
    OpenFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Byte-stream link to a sub-board bootloader
///
/// Reads are bounded by the transport's per-call timeout, so a read that
/// collects fewer bytes than requested returns the short count rather than
/// waiting indefinitely.
#[async_trait]
pub trait SerialTransport: Send {
    /// Read until `buf` is full or the timeout elapses
    ///
    /// # Returns
    /// The number of bytes read, which may be less than `buf.len()`
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data`
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Push any buffered output onto the wire
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Read a single byte, `None` if the timeout elapsed first
    async fn get(&mut self) -> Result<Option<u8>, TransportError> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte).await? {
            1 => Ok(Some(byte[0])),
            _ => Ok(None),
        }
    }

    /// Write a single byte
    async fn put(&mut self, byte: u8) -> Result<(), TransportError> {
        self.write(&[byte]).await.map(|_| ())
    }

    /// Set the per-call read timeout
    fn set_timeout(&mut self, timeout: Duration);

    /// Current per-call read timeout
    fn timeout(&self) -> Duration;

    /// Flush after every write when enabled
    fn set_auto_flush(&mut self, enabled: bool);

    /// True for USB-class endpoints where control lines carry meaning
    fn is_usb(&self) -> bool;

    /// Drive the DTR control line (ignored on a plain UART)
    fn set_dtr(&mut self, _level: bool) {}

    /// Drive the RTS control line (ignored on a plain UART)
    fn set_rts(&mut self, _level: bool) {}
}
