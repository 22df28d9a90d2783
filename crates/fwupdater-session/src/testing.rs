//! Simulated collaborators
//!
//! In-memory stand-ins for storage, the reporting channel, the panel
//! bootloader and the wireless uploader. Used by the unit tests, the
//! integration tests and the `example-panel` simulator.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use fwupdater_core::{
    BootloaderClient, BootloaderError, FlashDescriptor, PanelLink, Reporter, SerialTransport,
    Severity, Storage, StorageError, TransportError, WirelessError, WirelessUploader,
};
use fwupdater_serial::MockSerialTransport;

/// Handshake the panel bootloader expects after the link opens
pub const HANDSHAKE_REQUEST: &[u8] = b"N#";
/// Reply of a bootloader that accepted the handshake
pub const HANDSHAKE_REPLY: &[u8] = b"\n\r";

// =============================================================================
// Storage and reporting
// =============================================================================

/// Image storage held in memory, keyed by directory and file name
#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<(PathBuf, String), Vec<u8>>>,
    reads: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, directory: impl AsRef<Path>, name: &str, data: Vec<u8>) {
        self.files
            .write()
            .insert((directory.as_ref().to_path_buf(), name.to_string()), data);
    }

    pub fn remove(&self, directory: impl AsRef<Path>, name: &str) {
        self.files
            .write()
            .remove(&(directory.as_ref().to_path_buf(), name.to_string()));
    }

    /// Number of `read_file` calls so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Storage for MemoryStorage {
    fn file_exists(&self, directory: &Path, name: &str) -> bool {
        self.files
            .read()
            .contains_key(&(directory.to_path_buf(), name.to_string()))
    }

    fn read_file(&self, directory: &Path, name: &str) -> Result<Vec<u8>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .read()
            .get(&(directory.to_path_buf(), name.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}

/// Reporter that keeps every message
#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    /// Messages reported at `Severity::Error`
    pub fn errors(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(severity, _)| *severity == Severity::Error)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|(_, message)| message.contains(text))
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_string()));
    }
}

// =============================================================================
// Panel bootloader
// =============================================================================

/// Bootloader operations, as recorded by [`SimulatedPanel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelOp {
    Connect,
    Identify,
    Unlock,
    Erase,
    Write,
    Read,
    WriteOptions,
    Reset,
}

impl fmt::Display for PanelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Faults a [`SimulatedPanel`] injects
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    failures: HashMap<PanelOp, u32>,
    stall: Option<PanelOp>,
    corrupt: Vec<u32>,
}

impl FaultPlan {
    /// Reject the next `times` calls of `op`
    pub fn fail(mut self, op: PanelOp, times: u32) -> Self {
        self.failures.insert(op, times);
        self
    }

    /// Never answer `op`; the caller's timeout has to fire
    pub fn stall_on(mut self, op: PanelOp) -> Self {
        self.stall = Some(op);
        self
    }

    /// Flip every bit programmed at these flash offsets
    pub fn corrupt_at(mut self, offsets: &[u32]) -> Self {
        self.corrupt.extend_from_slice(offsets);
        self
    }
}

struct PanelState {
    layout: FlashDescriptor,
    flash: Vec<u8>,
    locked: bool,
    options_written: bool,
    ops: Vec<PanelOp>,
    plan: FaultPlan,
}

/// In-memory panel sub-board with a page-organised flash
///
/// Starts locked and filled with a non-erased pattern standing in for the
/// previous firmware. Clones share the same board.
#[derive(Clone)]
pub struct SimulatedPanel {
    state: Arc<Mutex<PanelState>>,
}

impl SimulatedPanel {
    pub fn new(page_size: u32, pages: u32) -> Self {
        let layout = FlashDescriptor {
            name: "SIM-PANEL".to_string(),
            base_address: 0x0040_0000,
            page_size,
            pages,
        };
        let flash = vec![0xA5; layout.total_size() as usize];
        Self {
            state: Arc::new(Mutex::new(PanelState {
                layout,
                flash,
                locked: true,
                options_written: false,
                ops: Vec::new(),
                plan: FaultPlan::default(),
            })),
        }
    }

    pub fn with_faults(self, plan: FaultPlan) -> Self {
        self.set_faults(plan);
        self
    }

    pub fn set_faults(&self, plan: FaultPlan) {
        self.state.lock().plan = plan;
    }

    pub fn flash(&self) -> Vec<u8> {
        self.state.lock().flash.clone()
    }

    pub fn ops(&self) -> Vec<PanelOp> {
        self.state.lock().ops.clone()
    }

    pub fn count(&self, op: PanelOp) -> usize {
        self.state.lock().ops.iter().filter(|o| **o == op).count()
    }

    pub fn options_written(&self) -> bool {
        self.state.lock().options_written
    }

    /// A fresh protocol client talking to this board
    pub fn client(&self) -> SimulatedBootloader {
        SimulatedBootloader {
            panel: self.clone(),
            transport: None,
        }
    }

    /// Record `op` and apply the fault plan to it
    async fn enter(&self, op: PanelOp) -> Result<(), BootloaderError> {
        let stall = {
            let mut state = self.state.lock();
            state.ops.push(op);
            if state.plan.stall == Some(op) {
                true
            } else {
                if let Some(remaining) = state.plan.failures.get_mut(&op) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(BootloaderError::Rejected(format!("{} refused", op)));
                    }
                }
                false
            }
        };

        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<(), BootloaderError> {
        let size = self.state.lock().flash.len();
        if offset as usize + len > size {
            return Err(BootloaderError::OutOfRange {
                offset,
                len: len as u32,
            });
        }
        Ok(())
    }
}

/// Protocol client for a [`SimulatedPanel`]
///
/// The handshake runs over the real serial transport handed to `connect`;
/// everything after that acts on the simulated board directly.
pub struct SimulatedBootloader {
    panel: SimulatedPanel,
    transport: Option<Box<dyn SerialTransport>>,
}

impl SimulatedBootloader {
    fn ensure_connected(&self) -> Result<(), BootloaderError> {
        if self.transport.is_some() {
            Ok(())
        } else {
            Err(BootloaderError::NotConnected)
        }
    }
}

#[async_trait]
impl BootloaderClient for SimulatedBootloader {
    async fn connect(
        &mut self,
        mut transport: Box<dyn SerialTransport>,
    ) -> Result<(), BootloaderError> {
        self.panel.enter(PanelOp::Connect).await?;

        transport.write(HANDSHAKE_REQUEST).await?;
        let mut reply = [0u8; 2];
        let n = transport.read(&mut reply).await?;
        if n == 0 {
            return Err(BootloaderError::NoResponse);
        }
        if &reply[..n] != HANDSHAKE_REPLY {
            return Err(BootloaderError::Handshake(format!(
                "unexpected reply {:02X?}",
                &reply[..n]
            )));
        }

        self.transport = Some(transport);
        Ok(())
    }

    async fn identify(&mut self) -> Result<FlashDescriptor, BootloaderError> {
        self.ensure_connected()?;
        self.panel.enter(PanelOp::Identify).await?;
        Ok(self.panel.state.lock().layout.clone())
    }

    async fn unlock(&mut self) -> Result<(), BootloaderError> {
        self.ensure_connected()?;
        self.panel.enter(PanelOp::Unlock).await?;
        self.panel.state.lock().locked = false;
        Ok(())
    }

    async fn erase(&mut self, offset: u32, len: u32) -> Result<(), BootloaderError> {
        self.ensure_connected()?;
        self.panel.enter(PanelOp::Erase).await?;
        self.panel.check_range(offset, len as usize)?;

        let mut state = self.panel.state.lock();
        if state.locked {
            return Err(BootloaderError::Rejected("region locked".to_string()));
        }
        let start = offset as usize;
        state.flash[start..start + len as usize].fill(0xFF);
        Ok(())
    }

    async fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), BootloaderError> {
        self.ensure_connected()?;
        self.panel.enter(PanelOp::Write).await?;
        self.panel.check_range(offset, data.len())?;

        let mut state = self.panel.state.lock();
        let start = offset as usize;
        state.flash[start..start + data.len()].copy_from_slice(data);
        let corrupt: Vec<usize> = state
            .plan
            .corrupt
            .iter()
            .map(|o| *o as usize)
            .filter(|o| (start..start + data.len()).contains(o))
            .collect();
        for at in corrupt {
            state.flash[at] ^= 0xFF;
        }
        Ok(())
    }

    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), BootloaderError> {
        self.ensure_connected()?;
        self.panel.enter(PanelOp::Read).await?;
        self.panel.check_range(offset, buf.len())?;

        let state = self.panel.state.lock();
        let start = offset as usize;
        buf.copy_from_slice(&state.flash[start..start + buf.len()]);
        Ok(())
    }

    async fn write_options(&mut self) -> Result<(), BootloaderError> {
        self.ensure_connected()?;
        self.panel.enter(PanelOp::WriteOptions).await?;
        let mut state = self.panel.state.lock();
        state.options_written = true;
        state.locked = true;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), BootloaderError> {
        self.ensure_connected()?;
        // The board leaves the link whether or not it answers
        self.transport = None;
        self.panel.enter(PanelOp::Reset).await?;
        debug!("Simulated panel restarted");
        Ok(())
    }
}

/// Opens mock serial links to a [`SimulatedPanel`]
pub struct SimulatedPanelLink {
    panel: SimulatedPanel,
    /// Answer to the handshake; `None` never answers
    reply: Option<Vec<u8>>,
    open_error: Mutex<Option<TransportError>>,
    last_transport: Mutex<Option<MockSerialTransport>>,
    opened: AtomicUsize,
}

impl SimulatedPanelLink {
    pub fn new(panel: SimulatedPanel) -> Self {
        Self {
            panel,
            reply: Some(HANDSHAKE_REPLY.to_vec()),
            open_error: Mutex::new(None),
            last_transport: Mutex::new(None),
            opened: AtomicUsize::new(0),
        }
    }

    /// A link on which the bootloader never answers the handshake
    pub fn silent(mut self) -> Self {
        self.reply = None;
        self
    }

    /// A link on which the handshake is answered with `reply`
    pub fn replying(mut self, reply: &[u8]) -> Self {
        self.reply = Some(reply.to_vec());
        self
    }

    /// Fail the next `open_transport` call
    pub fn fail_next_open(&self, error: TransportError) {
        *self.open_error.lock() = Some(error);
    }

    /// Handle on the most recently opened transport
    pub fn last_transport(&self) -> Option<MockSerialTransport> {
        self.last_transport.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl PanelLink for SimulatedPanelLink {
    fn open_transport(&self) -> Result<Box<dyn SerialTransport>, TransportError> {
        if let Some(error) = self.open_error.lock().take() {
            return Err(error);
        }

        let transport = MockSerialTransport::new();
        if let Some(reply) = &self.reply {
            transport.add_response(HANDSHAKE_REQUEST, reply.clone());
        }
        *self.last_transport.lock() = Some(transport.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(transport))
    }

    fn bootloader(&self) -> Box<dyn BootloaderClient> {
        Box::new(self.panel.client())
    }
}

// =============================================================================
// Wireless uploader
// =============================================================================

/// A `send_update_file` call seen by [`SimulatedWireless`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessUpload {
    pub file: String,
    pub directory: PathBuf,
    pub address: u32,
}

/// Wireless uploader that stays busy for a number of readiness checks
#[derive(Default)]
pub struct SimulatedWireless {
    busy_checks: u32,
    remaining: AtomicU32,
    uploads: Mutex<Vec<WirelessUpload>>,
    resets: Mutex<Vec<bool>>,
    fail_next: Mutex<Option<WirelessError>>,
}

impl SimulatedWireless {
    pub fn new() -> Self {
        Self::default()
    }

    /// After an upload starts, report busy for this many `is_ready` calls
    pub fn with_busy_checks(mut self, checks: u32) -> Self {
        self.busy_checks = checks;
        self
    }

    pub fn fail_next(&self, error: WirelessError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn uploads(&self) -> Vec<WirelessUpload> {
        self.uploads.lock().clone()
    }

    /// `external` flags of every reset-for-upload request
    pub fn resets(&self) -> Vec<bool> {
        self.resets.lock().clone()
    }
}

#[async_trait]
impl WirelessUploader for SimulatedWireless {
    fn is_ready(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    async fn send_update_file(
        &self,
        file: &str,
        directory: &Path,
        address: u32,
    ) -> Result<(), WirelessError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        if self.remaining.load(Ordering::SeqCst) > 0 {
            return Err(WirelessError::Busy);
        }

        self.uploads.lock().push(WirelessUpload {
            file: file.to_string(),
            directory: directory.to_path_buf(),
            address,
        });
        self.remaining.store(self.busy_checks, Ordering::SeqCst);
        Ok(())
    }

    async fn reset_for_upload(&self, external: bool) -> Result<(), WirelessError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        self.resets.lock().push(external);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_requires_reply() {
        let panel = SimulatedPanel::new(64, 4);

        let link = SimulatedPanelLink::new(panel.clone());
        let mut client = link.bootloader();
        client.connect(link.open_transport().unwrap()).await.unwrap();
        assert_eq!(
            link.last_transport().unwrap().sent(),
            HANDSHAKE_REQUEST.to_vec()
        );

        let silent = SimulatedPanelLink::new(panel).silent();
        let mut client = silent.bootloader();
        assert_eq!(
            client.connect(silent.open_transport().unwrap()).await,
            Err(BootloaderError::NoResponse)
        );
    }

    #[tokio::test]
    async fn test_commands_need_connection() {
        let panel = SimulatedPanel::new(64, 4);
        let mut client = panel.client();
        assert_eq!(client.identify().await, Err(BootloaderError::NotConnected));
    }

    #[tokio::test]
    async fn test_locked_region_refuses_erase() {
        let panel = SimulatedPanel::new(64, 4);
        let link = SimulatedPanelLink::new(panel.clone());
        let mut client = link.bootloader();
        client.connect(link.open_transport().unwrap()).await.unwrap();

        assert!(matches!(
            client.erase(0, 64).await,
            Err(BootloaderError::Rejected(_))
        ));
        client.unlock().await.unwrap();
        client.erase(0, 64).await.unwrap();
        assert!(panel.flash()[..64].iter().all(|b| *b == 0xFF));
        assert!(panel.flash()[64..].iter().all(|b| *b == 0xA5));
    }

    #[tokio::test]
    async fn test_out_of_range_write_rejected() {
        let panel = SimulatedPanel::new(64, 4);
        let link = SimulatedPanelLink::new(panel);
        let mut client = link.bootloader();
        client.connect(link.open_transport().unwrap()).await.unwrap();

        assert_eq!(
            client.write(192, &[0u8; 128]).await,
            Err(BootloaderError::OutOfRange {
                offset: 192,
                len: 128
            })
        );
    }

    #[tokio::test]
    async fn test_wireless_busy_after_upload() {
        let wireless = SimulatedWireless::new().with_busy_checks(2);
        assert!(wireless.is_ready());

        wireless
            .send_update_file("Wireless.bin", Path::new("sys"), 0)
            .await
            .unwrap();
        assert!(!wireless.is_ready());
        assert!(!wireless.is_ready());
        assert!(wireless.is_ready());
        assert_eq!(wireless.uploads().len(), 1);
    }

    #[test]
    fn test_memory_storage_lookup() {
        let storage = MemoryStorage::new();
        storage.insert("sys", "a.bin", vec![1]);
        assert!(storage.file_exists(Path::new("sys"), "a.bin"));
        storage.remove("sys", "a.bin");
        assert!(matches!(
            storage.read_file(Path::new("sys"), "a.bin"),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.read_count(), 1);
    }
}
