//! Serial link to the simulated panel
//!
//! Each opened link is an in-memory duplex stream. The host end is a real
//! [`UartTransport`]; the device end is served by a task that answers the
//! bootloader handshake the way the panel's boot ROM does.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

use fwupdater_core::{BootloaderClient, PanelLink, SerialTransport, TransportError};
use fwupdater_serial::{SerialConfig, UartTransport};
use fwupdater_session::testing::{SimulatedPanel, HANDSHAKE_REPLY, HANDSHAKE_REQUEST};

/// Bytes buffered in each direction of the duplex stream
const LINK_BUFFER: usize = 4096;

/// Panel link whose far end is a simulated boot ROM
pub struct DuplexPanelLink {
    panel: SimulatedPanel,
    serial: SerialConfig,
    silent: bool,
}

impl DuplexPanelLink {
    pub fn new(panel: SimulatedPanel, serial: SerialConfig) -> Self {
        Self {
            panel,
            serial,
            silent: false,
        }
    }

    /// Boot ROM that never answers, as with the panel unplugged
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

impl PanelLink for DuplexPanelLink {
    fn open_transport(&self) -> Result<Box<dyn SerialTransport>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::OpenFailed(format!("{}: {}", self.serial.device, e)))?;

        let (host, device) = tokio::io::duplex(LINK_BUFFER);
        runtime.spawn(serve_boot_rom(device, self.silent));

        Ok(Box::new(UartTransport::new(host, &self.serial)))
    }

    fn bootloader(&self) -> Box<dyn BootloaderClient> {
        Box::new(self.panel.client())
    }
}

/// Answer handshakes until the host closes its end
async fn serve_boot_rom(mut device: DuplexStream, silent: bool) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let n = match device.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        trace!(rx = ?&buf[..n], "boot rom rx");

        while let Some(at) = find(&pending, HANDSHAKE_REQUEST) {
            pending.drain(..at + HANDSHAKE_REQUEST.len());
            if silent {
                continue;
            }
            if device.write_all(HANDSHAKE_REPLY).await.is_err() {
                return;
            }
            debug!("Boot ROM answered handshake");
        }
    }
    debug!("Panel link closed");
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
