//! Panel flash session state machine
//!
//! A session walks the panel through its phases in a fixed order. Each call to
//! [`UpdateSession::step`] performs at most one bounded bootloader call, so the
//! control loop driving it regains control after one I/O timeout at worst.
//! Long operations (erase, write, verify) are split into chunks of
//! `pages_per_poll` pages.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fwupdater_core::{
    BootloaderClient, BootloaderError, FlashDescriptor, FlashProgress, Phase, SerialTransport,
    SessionFailure, SessionOutcome, Storage,
};

use crate::config::PanelConfig;

/// Value of an erased flash byte; pads the final page of the image
const ERASED: u8 = 0xFF;

/// One attempt to flash the panel sub-board
pub struct UpdateSession {
    id: u64,
    phase: Phase,
    client: Box<dyn BootloaderClient>,
    /// Held until the bootloader client takes it over at connect
    transport: Option<Box<dyn SerialTransport>>,
    storage: Arc<dyn Storage>,
    image_dir: PathBuf,
    image_name: String,
    io_timeout: Duration,
    pages_per_poll: u32,
    io_retries: u32,
    layout: Option<FlashDescriptor>,
    image: Option<Vec<u8>>,
    unlocked: bool,
    /// Next page to erase, write or verify in the current phase
    next_page: u32,
    /// Failed attempts of the current unit of work
    attempts: u32,
    progress: FlashProgress,
    target_erased: bool,
}

impl UpdateSession {
    pub fn new(
        id: u64,
        client: Box<dyn BootloaderClient>,
        transport: Box<dyn SerialTransport>,
        storage: Arc<dyn Storage>,
        image_dir: impl Into<PathBuf>,
        config: &PanelConfig,
    ) -> Self {
        Self {
            id,
            phase: Phase::Idle,
            client,
            transport: Some(transport),
            storage,
            image_dir: image_dir.into(),
            image_name: config.firmware_file.clone(),
            io_timeout: config.io_timeout(),
            pages_per_poll: config.pages_per_poll.max(1),
            io_retries: config.io_retries,
            layout: None,
            image: None,
            unlocked: false,
            next_page: 0,
            attempts: 0,
            progress: FlashProgress::default(),
            target_erased: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn progress(&self) -> &FlashProgress {
        &self.progress
    }

    /// Flash layout, known once identification succeeded
    pub fn layout(&self) -> Option<&FlashDescriptor> {
        self.layout.as_ref()
    }

    /// True once an erase command has been issued to the panel
    pub fn target_erased(&self) -> bool {
        self.target_erased
    }

    /// Leave `Idle`; the first step performs the handshake
    pub fn start(&mut self) {
        if self.phase == Phase::Idle {
            self.advance(Phase::Connecting);
        }
    }

    /// Stop the session before the panel is modified
    ///
    /// Returns the current phase as the error when the erase has already begun
    /// (or the session has ended).
    pub fn abort(&mut self) -> Result<(), Phase> {
        if !self.phase.is_abortable() {
            return Err(self.phase.clone());
        }
        self.transport = None;
        self.fail(SessionFailure::Aborted);
        Ok(())
    }

    /// Perform one unit of work for the current phase
    ///
    /// Does nothing in `Idle` and in the terminal phases.
    pub async fn step(&mut self) -> &Phase {
        let result = match self.phase {
            Phase::Idle | Phase::Complete | Phase::Failed(_) => return &self.phase,
            Phase::Connecting => self.connect().await,
            Phase::Identifying => self.identify().await,
            Phase::Erasing => self.erase_chunk().await,
            Phase::Writing => self.write_chunk().await,
            Phase::Verifying => self.verify_chunk().await,
            Phase::Finalizing => self.finalize().await,
            Phase::Resetting => {
                self.reset().await;
                Ok(())
            }
        };

        if let Err(failure) = result {
            self.fail(failure);
        }
        &self.phase
    }

    pub fn into_outcome(self) -> SessionOutcome {
        SessionOutcome {
            session_id: self.id,
            phase: self.phase,
            progress: self.progress,
            target_erased: self.target_erased,
        }
    }

    async fn connect(&mut self) -> Result<(), SessionFailure> {
        let Some(transport) = self.transport.take() else {
            return Err(SessionFailure::Connect(
                "serial link already released".to_string(),
            ));
        };

        // The client owns the link from here on, so a failed handshake is final
        bounded(self.io_timeout, self.client.connect(transport))
            .await
            .map_err(|e| SessionFailure::Connect(e.to_string()))?;

        debug!(session_id = self.id, "Bootloader handshake complete");
        self.advance(Phase::Identifying);
        Ok(())
    }

    async fn identify(&mut self) -> Result<(), SessionFailure> {
        let layout = match bounded(self.io_timeout, self.client.identify()).await {
            Ok(layout) => layout,
            Err(e) => return self.retry_or_fail(e, SessionFailure::Identify),
        };

        if layout.page_size == 0 || layout.pages == 0 {
            return Err(SessionFailure::Identify(format!(
                "{} reports an empty flash region",
                layout.name
            )));
        }
        if layout.total_size() > u32::MAX as u64 {
            return Err(SessionFailure::Identify(format!(
                "{} reports a flash region larger than the address space",
                layout.name
            )));
        }

        info!(
            session_id = self.id,
            device = %layout.name,
            page_size = layout.page_size,
            pages = layout.pages,
            "Panel identified"
        );
        self.progress.pages_total = layout.pages;
        self.progress.page_size = layout.page_size;
        self.layout = Some(layout);
        self.advance(Phase::Erasing);
        Ok(())
    }

    async fn erase_chunk(&mut self) -> Result<(), SessionFailure> {
        let (page_size, pages) = self.geometry(SessionFailure::Erase)?;

        if !self.unlocked {
            return match bounded(self.io_timeout, self.client.unlock()).await {
                Ok(()) => {
                    self.unlocked = true;
                    self.attempts = 0;
                    Ok(())
                }
                Err(e) => self.retry_or_fail(e, SessionFailure::Erase),
            };
        }

        let count = self.pages_per_poll.min(pages - self.next_page);
        let offset = self.next_page * page_size;

        self.target_erased = true;
        match bounded(self.io_timeout, self.client.erase(offset, count * page_size)).await {
            Ok(()) => {
                debug!(session_id = self.id, offset, pages = count, "Erased flash pages");
                self.attempts = 0;
                self.next_page += count;
                self.progress.pages_erased = self.next_page;
                if self.next_page >= pages {
                    self.advance(Phase::Writing);
                }
                Ok(())
            }
            Err(e) => self.retry_or_fail(e, SessionFailure::Erase),
        }
    }

    async fn write_chunk(&mut self) -> Result<(), SessionFailure> {
        let (page_size, pages) = self.geometry(SessionFailure::Write)?;
        if self.image.is_none() {
            self.load_image(page_size, pages)?;
        }

        let image_pages = self.progress.image_pages();
        let count = self.pages_per_poll.min(image_pages - self.next_page);
        let offset = self.next_page * page_size;

        let (data, image_bytes) = {
            let image = self.image.as_deref().unwrap_or_default();
            let start = offset as usize;
            let end = (start + (count * page_size) as usize).min(image.len());
            let mut data = image[start..end].to_vec();
            data.resize((count * page_size) as usize, ERASED);
            (data, (end - start) as u32)
        };

        match bounded(self.io_timeout, self.client.write(offset, &data)).await {
            Ok(()) => {
                debug!(session_id = self.id, offset, pages = count, "Wrote flash pages");
                self.attempts = 0;
                self.next_page += count;
                self.progress.pages_written = self.next_page;
                self.progress.bytes_written += image_bytes;
                if self.next_page >= image_pages {
                    self.advance(Phase::Verifying);
                }
                Ok(())
            }
            Err(e) => self.retry_or_fail(e, SessionFailure::Write),
        }
    }

    async fn verify_chunk(&mut self) -> Result<(), SessionFailure> {
        let (page_size, _) = self.geometry(SessionFailure::ReadBack)?;

        let image_pages = self.progress.image_pages();
        let count = self.pages_per_poll.min(image_pages - self.next_page);
        let offset = self.next_page * page_size;
        let mut readback = vec![0u8; (count * page_size) as usize];

        if let Err(e) = bounded(self.io_timeout, self.client.read(offset, &mut readback)).await {
            return self.retry_or_fail(e, SessionFailure::ReadBack);
        }

        let image = self.image.as_deref().unwrap_or_default();
        for (index, flashed) in readback.chunks(page_size as usize).enumerate() {
            let start = offset as usize + index * page_size as usize;
            let end = (start + page_size as usize).min(image.len());
            // Only image bytes count; the padding of the last page is ignored
            let expected = image.get(start..end).unwrap_or_default();
            let differing = expected
                .iter()
                .zip(flashed)
                .filter(|(want, got)| want != got)
                .count() as u32;
            if differing > 0 {
                warn!(
                    session_id = self.id,
                    page = self.next_page + index as u32,
                    bytes = differing,
                    "Verify mismatch"
                );
                self.progress.page_errors += 1;
                self.progress.total_errors += differing;
            }
        }

        self.attempts = 0;
        self.next_page += count;
        self.progress.pages_verified = self.next_page;

        if self.next_page < image_pages {
            return Ok(());
        }
        if self.progress.page_errors > 0 || self.progress.total_errors > 0 {
            return Err(SessionFailure::Verify {
                page_errors: self.progress.page_errors,
                total_errors: self.progress.total_errors,
            });
        }
        self.advance(Phase::Finalizing);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), SessionFailure> {
        match bounded(self.io_timeout, self.client.write_options()).await {
            Ok(()) => {
                self.advance(Phase::Resetting);
                Ok(())
            }
            Err(e) => self.retry_or_fail(e, SessionFailure::Finalize),
        }
    }

    async fn reset(&mut self) {
        // The panel restarts and drops off the link, so no answer is expected
        if let Err(e) = bounded(self.io_timeout, self.client.reset()).await {
            debug!(session_id = self.id, error = %e, "Reset not acknowledged");
        }
        self.advance(Phase::Complete);
    }

    fn load_image(&mut self, page_size: u32, pages: u32) -> Result<(), SessionFailure> {
        let image = self
            .storage
            .read_file(&self.image_dir, &self.image_name)
            .map_err(|e| SessionFailure::Write(e.to_string()))?;

        if image.is_empty() {
            return Err(SessionFailure::Write(format!(
                "image {} is empty",
                self.image_name
            )));
        }
        let capacity = page_size as u64 * pages as u64;
        if image.len() as u64 > capacity {
            return Err(SessionFailure::Write(format!(
                "image of {} bytes exceeds {} byte flash",
                image.len(),
                capacity
            )));
        }

        info!(
            session_id = self.id,
            image = %self.image_name,
            bytes = image.len(),
            "Loaded panel firmware image"
        );
        self.progress.image_bytes = image.len() as u32;
        self.image = Some(image);
        Ok(())
    }

    fn geometry(
        &self,
        failure: fn(String) -> SessionFailure,
    ) -> Result<(u32, u32), SessionFailure> {
        self.layout
            .as_ref()
            .map(|layout| (layout.page_size, layout.pages))
            .ok_or_else(|| failure("flash layout unknown".to_string()))
    }

    /// Count a failed unit of work; the phase fails once retries run out
    fn retry_or_fail(
        &mut self,
        error: BootloaderError,
        failure: fn(String) -> SessionFailure,
    ) -> Result<(), SessionFailure> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.io_retries {
            return Err(failure(error.to_string()));
        }
        warn!(
            session_id = self.id,
            phase = %self.phase,
            attempt = self.attempts,
            error = %error,
            "Bootloader call failed, retrying on next poll"
        );
        Ok(())
    }

    fn advance(&mut self, next: Phase) {
        info!(session_id = self.id, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        self.next_page = 0;
        self.attempts = 0;
    }

    fn fail(&mut self, failure: SessionFailure) {
        warn!(
            session_id = self.id,
            phase = %self.phase,
            target_erased = self.target_erased,
            "Panel update failed: {}",
            failure
        );
        self.phase = Phase::Failed(failure);
    }
}

/// Run one bootloader call under the session's I/O timeout
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, BootloaderError>
where
    F: Future<Output = Result<T, BootloaderError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(BootloaderError::Timeout))
}
