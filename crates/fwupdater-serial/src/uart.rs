//! UART transport over a tokio byte stream

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace};

use fwupdater_core::{SerialTransport, TransportError};

use crate::config::SerialConfig;

/// Plain UART endpoint
///
/// DTR and RTS have no meaning on this link, so the control line setters
/// keep their no-op defaults.
pub struct UartTransport<S> {
    stream: S,
    device: String,
    timeout: Duration,
    auto_flush: bool,
}

impl<S> UartTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already opened port
    pub fn new(stream: S, config: &SerialConfig) -> Self {
        debug!(
            device = %config.device,
            baud_rate = config.baud_rate,
            timeout_ms = config.timeout_ms,
            "UART transport opened"
        );
        Self {
            stream,
            device: config.device.clone(),
            timeout: config.timeout(),
            auto_flush: config.auto_flush,
        }
    }
}

#[async_trait]
impl<S> SerialTransport for UartTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let deadline = Instant::now() + self.timeout;
        let mut read = 0;

        while read < buf.len() {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut buf[read..])).await {
                Ok(Ok(0)) if read == 0 => return Err(TransportError::ConnectionClosed),
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => read += n,
                Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                // Deadline passed: hand back whatever arrived
                Err(_) => break,
            }
        }

        trace!(device = %self.device, rx = %hex::encode(&buf[..read]), "uart rx");
        Ok(read)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        trace!(device = %self.device, tx = %hex::encode(data), "uart tx");

        match tokio::time::timeout(self.timeout, self.stream.write_all(data)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::SendFailed(e.to_string())),
            Err(_) => {
                return Err(TransportError::Timeout(format!(
                    "writing {} bytes to {}",
                    data.len(),
                    self.device
                )))
            }
        }

        if self.auto_flush {
            self.flush().await?;
        }
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_auto_flush(&mut self, enabled: bool) {
        self.auto_flush = enabled;
    }

    fn is_usb(&self) -> bool {
        false
    }
}
