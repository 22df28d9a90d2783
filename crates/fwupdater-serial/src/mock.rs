//! Mock serial transport for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use fwupdater_core::{SerialTransport, TransportError};

#[derive(Default)]
struct MockState {
    /// Bytes waiting to be read
    rx: Mutex<VecDeque<u8>>,
    /// Everything written so far
    tx: Mutex<Vec<u8>>,
    /// Predefined responses (written bytes -> bytes queued for reading)
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    connected: AtomicBool,
    flushes: AtomicUsize,
    dtr: Mutex<Option<bool>>,
    rts: Mutex<Option<bool>>,
}

/// Mock serial transport
///
/// Clones share the same state, so a test can keep one handle for
/// inspection after boxing another into a session. Reads never wait: an
/// empty receive queue behaves like an immediate timeout.
#[derive(Clone)]
pub struct MockSerialTransport {
    state: Arc<MockState>,
    timeout: Duration,
    auto_flush: bool,
    usb: bool,
}

impl MockSerialTransport {
    pub fn new() -> Self {
        let state = MockState::default();
        state.connected.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
            timeout: Duration::from_millis(500),
            auto_flush: false,
            usb: false,
        }
    }

    /// Behave as a USB-class endpoint, where DTR/RTS are honoured
    pub fn usb() -> Self {
        Self {
            usb: true,
            ..Self::new()
        }
    }

    /// Queue `response` for reading whenever exactly `request` is written
    pub fn add_response(&self, request: impl Into<Vec<u8>>, response: impl Into<Vec<u8>>) {
        self.state
            .responses
            .write()
            .push((request.into(), response.into()));
    }

    /// Make bytes available to the next read
    pub fn inject(&self, data: &[u8]) {
        self.state.rx.lock().extend(data.iter().copied());
    }

    /// All bytes written through any clone
    pub fn sent(&self) -> Vec<u8> {
        self.state.tx.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.flushes.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::SeqCst);
    }

    /// Last DTR and RTS levels applied (only recorded for USB endpoints)
    pub fn control_lines(&self) -> (Option<bool>, Option<bool>) {
        (*self.state.dtr.lock(), *self.state.rts.lock())
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.state.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

impl Default for MockSerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SerialTransport for MockSerialTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check_connected()?;

        let mut rx = self.state.rx.lock();
        let n = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.check_connected()?;

        self.state.tx.lock().extend_from_slice(data);
        tracing::debug!(tx = %hex::encode(data), "Mock transport: sent bytes");

        let response = self
            .state
            .responses
            .read()
            .iter()
            .find(|(request, _)| request.as_slice() == data)
            .map(|(_, response)| response.clone());
        if let Some(response) = response {
            self.inject(&response);
        }

        if self.auto_flush {
            self.state.flushes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.check_connected()?;
        self.state.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
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
        self.usb
    }

    fn set_dtr(&mut self, level: bool) {
        if self.usb {
            *self.state.dtr.lock() = Some(level);
        }
    }

    fn set_rts(&mut self, level: bool) {
        if self.usb {
            *self.state.rts.lock() = Some(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_response() {
        let mock = MockSerialTransport::new();
        mock.add_response(b"N#".to_vec(), b"\n\r".to_vec());

        let mut transport = mock.clone();
        transport.write(b"N#").await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"\n\r");
        assert_eq!(mock.sent(), b"N#".to_vec());
    }

    #[tokio::test]
    async fn test_empty_queue_reads_nothing() {
        let mut transport = MockSerialTransport::new();
        assert_eq!(transport.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnected_transport_errors() {
        let mock = MockSerialTransport::new();
        mock.set_connected(false);

        let mut transport = mock.clone();
        assert_eq!(
            transport.write(b"x").await,
            Err(TransportError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_control_lines_ignored_on_uart() {
        let uart = MockSerialTransport::new();
        let mut transport = uart.clone();
        transport.set_dtr(true);
        transport.set_rts(false);
        assert_eq!(uart.control_lines(), (None, None));

        let usb = MockSerialTransport::usb();
        let mut transport = usb.clone();
        transport.set_dtr(true);
        transport.set_rts(false);
        assert!(transport.is_usb());
        assert_eq!(usb.control_lines(), (Some(true), Some(false)));
    }

    #[tokio::test]
    async fn test_auto_flush_counts_writes() {
        let mock = MockSerialTransport::new();
        let mut transport = mock.clone();
        transport.set_auto_flush(true);
        transport.put(0x80).await.unwrap();
        transport.write(&[1, 2]).await.unwrap();
        assert_eq!(mock.flush_count(), 2);
    }
}
