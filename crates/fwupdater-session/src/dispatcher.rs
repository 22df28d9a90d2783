//! Module dispatcher
//!
//! Owns the panel session (at most one) and forwards wireless work to the
//! wireless uploader. The containing firmware drives it from its control loop:
//!
//! ```text
//! validate_request(bitmap) ─► dispatch(module)* ─► poll() ... poll() ─► take_outcome()
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use fwupdater_core::{
    FlashProgress, ModuleBitmap, ModuleId, PanelLink, Phase, Reporter, SessionFailure,
    SessionOutcome, Severity, Storage, WirelessError, WirelessUploader,
};

use crate::config::UpdaterConfig;
use crate::error::{DispatchError, UpdateError, ValidationError};
use crate::session::UpdateSession;
use crate::validator::RequestValidator;

/// Appended to failure reports once the panel flash has been erased
const RETRY_NOTICE: &str = "panel firmware was erased; update the panel again before use";

/// Routes update modules to their backends and drives the panel session
pub struct ModuleDispatcher {
    config: UpdaterConfig,
    storage: Arc<dyn Storage>,
    reporter: Arc<dyn Reporter>,
    panel: Arc<dyn PanelLink>,
    wireless: Option<Arc<dyn WirelessUploader>>,
    session: Option<UpdateSession>,
    next_session_id: u64,
    last_outcome: Option<SessionOutcome>,
}

impl ModuleDispatcher {
    pub fn new(
        config: UpdaterConfig,
        storage: Arc<dyn Storage>,
        reporter: Arc<dyn Reporter>,
        panel: Arc<dyn PanelLink>,
    ) -> Self {
        Self {
            config,
            storage,
            reporter,
            panel,
            wireless: None,
            session: None,
            next_session_id: 1,
            last_outcome: None,
        }
    }

    /// Attach the wireless co-processor's uploader
    pub fn with_wireless(mut self, uploader: Arc<dyn WirelessUploader>) -> Self {
        self.wireless = Some(uploader);
        self
    }

    /// Check a module request; rejections go to the reporting channel
    pub fn validate_request(&self, request: ModuleBitmap) -> Result<(), ValidationError> {
        let validator = RequestValidator::new(
            self.storage.as_ref(),
            &self.config.sys_dir,
            &self.config.wireless.firmware_file,
        );
        validator.validate(request).map_err(|e| {
            warn!(modules = %request, error = %e, "Module request rejected");
            self.reporter.report(Severity::Error, &e.to_string());
            e
        })
    }

    /// True when no panel session is active and the wireless uploader is idle or absent
    pub fn is_ready(&self) -> bool {
        self.session.is_none() && self.wireless().map_or(true, |w| w.is_ready())
    }

    /// Start the update of one module
    ///
    /// Wireless updates are handed off and finish in the background; watch
    /// [`ModuleDispatcher::is_ready`]. A panel update creates a session that
    /// [`ModuleDispatcher::poll`] then drives.
    pub async fn dispatch(&mut self, module: ModuleId) -> Result<(), DispatchError> {
        match module {
            ModuleId::WirelessFirmwareExternal => {
                let Some(uploader) = self.wireless_for(module)? else {
                    return Ok(());
                };
                info!("Resetting wireless module for external upload");
                uploader
                    .reset_for_upload(true)
                    .await
                    .map_err(|e| self.wireless_failed(e))
            }
            ModuleId::WirelessFirmware => {
                let Some(uploader) = self.wireless_for(module)? else {
                    return Ok(());
                };
                let wireless = &self.config.wireless;
                info!(
                    file = %wireless.firmware_file,
                    address = wireless.firmware_address,
                    "Sending wireless firmware"
                );
                uploader
                    .send_update_file(
                        &wireless.firmware_file,
                        &self.config.sys_dir,
                        wireless.firmware_address,
                    )
                    .await
                    .map_err(|e| self.wireless_failed(e))
            }
            ModuleId::PanelFirmware => self.start_panel_session(),
        }
    }

    /// Validate `request`, then dispatch each module in ascending order
    ///
    /// Nothing is dispatched unless the whole request validates.
    pub async fn dispatch_all(&mut self, request: ModuleBitmap) -> Result<(), UpdateError> {
        self.validate_request(request)?;

        if request.unknown_bits() != 0 {
            debug!(
                bits = format_args!("{:#04x}", request.unknown_bits()),
                "Ignoring unknown module bits"
            );
        }
        for module in request.modules() {
            self.dispatch(module).await?;
        }
        Ok(())
    }

    /// Advance the panel session by one unit of work
    ///
    /// Returns the session's phase afterwards, or `None` when no session is
    /// active. A session that reaches `Complete` or `Failed` is reported and
    /// discarded; its outcome stays available through
    /// [`ModuleDispatcher::take_outcome`].
    pub async fn poll(&mut self) -> Option<Phase> {
        let session = self.session.as_mut()?;
        let phase = session.step().await.clone();

        if phase.is_terminal() {
            self.finish_session();
        }
        Some(phase)
    }

    /// Abort the panel session before its erase begins
    pub fn abort(&mut self) -> Result<(), DispatchError> {
        let session = self.session.as_mut().ok_or(DispatchError::NoSession)?;

        if let Err(phase) = session.abort() {
            warn!(
                session_id = session.id(),
                phase = %phase,
                "Abort refused after erase started"
            );
            return Err(DispatchError::AbortRefused {
                phase: phase.to_string(),
            });
        }
        self.finish_session();
        Ok(())
    }

    pub fn panel_phase(&self) -> Option<Phase> {
        self.session.as_ref().map(|s| s.phase().clone())
    }

    pub fn panel_progress(&self) -> Option<FlashProgress> {
        self.session.as_ref().map(|s| s.progress().clone())
    }

    /// Outcome of the last finished panel session, if not yet taken
    pub fn take_outcome(&mut self) -> Option<SessionOutcome> {
        self.last_outcome.take()
    }

    fn start_panel_session(&mut self) -> Result<(), DispatchError> {
        if let Some(active) = &self.session {
            warn!(
                session_id = active.id(),
                phase = %active.phase(),
                "Panel update requested while one is in progress"
            );
            return Err(DispatchError::SessionActive);
        }

        let transport = self.panel.open_transport().map_err(|e| {
            self.reporter
                .report(Severity::Error, &format!("Panel update not started: {}", e));
            DispatchError::Transport(e)
        })?;

        let id = self.next_session_id;
        self.next_session_id += 1;

        let mut session = UpdateSession::new(
            id,
            self.panel.bootloader(),
            transport,
            self.storage.clone(),
            self.config.sys_dir.clone(),
            &self.config.panel,
        );
        session.start();
        info!(
            session_id = id,
            image = %self.config.panel.firmware_file,
            "Panel update started"
        );

        self.last_outcome = None;
        self.session = Some(session);
        Ok(())
    }

    fn finish_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let outcome = session.into_outcome();

        match &outcome.phase {
            Phase::Complete => {
                info!(session_id = outcome.session_id, "Panel update complete");
                self.reporter
                    .report(Severity::Info, "Panel firmware updated");
            }
            Phase::Failed(SessionFailure::Aborted) => {
                info!(session_id = outcome.session_id, "Panel update aborted");
                self.reporter.report(
                    Severity::Warning,
                    &format!("Panel update {}", SessionFailure::Aborted),
                );
            }
            Phase::Failed(reason) => {
                let message = if outcome.target_erased {
                    format!("Panel update failed: {}; {}", reason, RETRY_NOTICE)
                } else {
                    format!("Panel update failed: {}", reason)
                };
                self.reporter.report(Severity::Error, &message);
            }
            other => {
                debug!(session_id = outcome.session_id, phase = %other, "Session discarded");
            }
        }

        self.last_outcome = Some(outcome);
    }

    /// Uploader to use for `module`; `None` when wireless is disabled on this board
    fn wireless_for(
        &self,
        module: ModuleId,
    ) -> Result<Option<Arc<dyn WirelessUploader>>, DispatchError> {
        if !self.config.wireless.enabled {
            debug!(module = %module, "Wireless disabled, skipping module");
            return Ok(None);
        }
        match &self.wireless {
            Some(uploader) => Ok(Some(uploader.clone())),
            None => {
                self.reporter.report(
                    Severity::Error,
                    &format!("Cannot update {}: no wireless module", module),
                );
                Err(DispatchError::WirelessUnavailable)
            }
        }
    }

    fn wireless(&self) -> Option<&Arc<dyn WirelessUploader>> {
        if self.config.wireless.enabled {
            self.wireless.as_ref()
        } else {
            None
        }
    }

    fn wireless_failed(&self, error: WirelessError) -> DispatchError {
        self.reporter.report(Severity::Error, &error.to_string());
        DispatchError::Wireless(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FaultPlan, MemoryStorage, PanelOp, RecordingReporter, SimulatedPanel, SimulatedPanelLink,
        SimulatedWireless, WirelessUpload,
    };
    use fwupdater_core::TransportError;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    struct Harness {
        dispatcher: ModuleDispatcher,
        storage: Arc<MemoryStorage>,
        reporter: Arc<RecordingReporter>,
        panel: SimulatedPanel,
        link: Arc<SimulatedPanelLink>,
        wireless: Arc<SimulatedWireless>,
    }

    fn config() -> UpdaterConfig {
        let mut config = UpdaterConfig::default();
        config.panel.io_timeout_ms = 200;
        config
    }

    fn harness_with(config: UpdaterConfig, wireless: SimulatedWireless) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("sys", "PanelFirmware.bin", vec![0x42; 200]);
        storage.insert("sys", "WirelessServer.bin", vec![0xE9; 64]);
        let reporter = Arc::new(RecordingReporter::new());
        let panel = SimulatedPanel::new(64, 8);
        let link = Arc::new(SimulatedPanelLink::new(panel.clone()));
        let wireless = Arc::new(wireless);

        let dispatcher = ModuleDispatcher::new(
            config,
            storage.clone(),
            reporter.clone(),
            link.clone(),
        )
        .with_wireless(wireless.clone());

        Harness {
            dispatcher,
            storage,
            reporter,
            panel,
            link,
            wireless,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), SimulatedWireless::new())
    }

    async fn poll_to_end(dispatcher: &mut ModuleDispatcher) -> Vec<Phase> {
        let mut seen = Vec::new();
        while let Some(phase) = dispatcher.poll().await {
            if seen.last() != Some(&phase) {
                seen.push(phase);
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_poll_without_session_is_noop() {
        let mut h = harness();
        assert_eq!(h.dispatcher.poll().await, None);
        assert!(h.dispatcher.is_ready());
        assert!(h.panel.ops().is_empty());
        assert!(h.reporter.messages().is_empty());
    }

    #[tokio::test]
    async fn test_panel_update_runs_to_completion() {
        let mut h = harness();
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();
        assert_eq!(h.dispatcher.panel_phase(), Some(Phase::Connecting));
        assert!(!h.dispatcher.is_ready());

        let phases = poll_to_end(&mut h.dispatcher).await;
        assert_eq!(
            phases,
            vec![
                Phase::Identifying,
                Phase::Erasing,
                Phase::Writing,
                Phase::Verifying,
                Phase::Finalizing,
                Phase::Resetting,
                Phase::Complete,
            ]
        );

        assert!(h.dispatcher.is_ready());
        assert_eq!(h.dispatcher.panel_phase(), None);
        let outcome = h.dispatcher.take_outcome().unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.session_id, 1);
        assert_eq!(h.dispatcher.take_outcome(), None);
        assert!(h.reporter.errors().is_empty());
        assert!(h.reporter.contains("Panel firmware updated"));
    }

    #[tokio::test]
    async fn test_second_panel_dispatch_rejected_without_side_effects() {
        let mut h = harness();
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();
        h.dispatcher.poll().await;
        h.dispatcher.poll().await;
        let before = h.dispatcher.panel_phase();
        let progress = h.dispatcher.panel_progress();

        let err = h
            .dispatcher
            .dispatch(ModuleId::PanelFirmware)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::SessionActive));
        assert!(err.is_concurrent_session());
        assert_eq!(err.to_string(), "update already in progress");
        assert_eq!(h.dispatcher.panel_phase(), before);
        assert_eq!(h.dispatcher.panel_progress(), progress);
        assert_eq!(h.link.open_count(), 1);
    }

    #[tokio::test]
    async fn test_verify_failure_reported_with_counts_and_retry_notice() {
        let mut h = harness();
        h.panel
            .set_faults(FaultPlan::default().corrupt_at(&[0, 1, 70, 71, 72]));
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();

        let phases = poll_to_end(&mut h.dispatcher).await;
        assert_eq!(
            phases.last(),
            Some(&Phase::Failed(SessionFailure::Verify {
                page_errors: 2,
                total_errors: 5
            }))
        );
        assert!(!phases.contains(&Phase::Finalizing));
        assert!(!phases.contains(&Phase::Resetting));

        let errors = h.reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("page errors 2"), "{}", errors[0]);
        assert!(errors[0].contains("byte errors 5"), "{}", errors[0]);
        assert!(errors[0].contains(RETRY_NOTICE));

        let outcome = h.dispatcher.take_outcome().unwrap();
        assert!(outcome.requires_retry());
        assert!(h.dispatcher.is_ready());
    }

    #[tokio::test]
    async fn test_connect_failure_has_no_retry_notice() {
        let mut h = harness();
        h.panel
            .set_faults(FaultPlan::default().fail(PanelOp::Connect, 1));
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();

        poll_to_end(&mut h.dispatcher).await;
        let errors = h.reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Panel update failed: connect error"));
        assert!(!errors[0].contains(RETRY_NOTICE));
    }

    #[tokio::test]
    async fn test_fresh_dispatch_after_failure_succeeds() {
        let mut h = harness();
        h.panel.set_faults(FaultPlan::default().corrupt_at(&[10]));
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();
        poll_to_end(&mut h.dispatcher).await;
        assert!(!h.dispatcher.take_outcome().unwrap().succeeded());

        h.panel.set_faults(FaultPlan::default());
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();
        poll_to_end(&mut h.dispatcher).await;
        let outcome = h.dispatcher.take_outcome().unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.session_id, 2);
    }

    #[tokio::test]
    async fn test_abort_before_erase() {
        let mut h = harness();
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();
        assert_eq!(h.dispatcher.poll().await, Some(Phase::Identifying));

        h.dispatcher.abort().unwrap();
        assert!(h.dispatcher.is_ready());
        let outcome = h.dispatcher.take_outcome().unwrap();
        assert_eq!(outcome.phase, Phase::Failed(SessionFailure::Aborted));
        assert!(!outcome.target_erased);
        assert_eq!(h.panel.count(PanelOp::Erase), 0);
        assert!(h.reporter.contains("aborted before erase"));
    }

    #[tokio::test]
    async fn test_abort_refused_once_erasing() {
        let mut h = harness();
        h.dispatcher.dispatch(ModuleId::PanelFirmware).await.unwrap();
        while h.dispatcher.panel_phase() != Some(Phase::Erasing) {
            h.dispatcher.poll().await;
        }

        let err = h.dispatcher.abort().unwrap_err();
        assert!(matches!(err, DispatchError::AbortRefused { ref phase } if phase == "erasing"));
        assert!(err.is_concurrent_session());
        assert_eq!(h.dispatcher.panel_phase(), Some(Phase::Erasing));

        // Later phases refuse too
        while h.dispatcher.panel_phase() != Some(Phase::Verifying) {
            h.dispatcher.poll().await;
        }
        assert!(h.dispatcher.abort().is_err());
        assert_eq!(
            poll_to_end(&mut h.dispatcher).await.last(),
            Some(&Phase::Complete)
        );
    }

    #[tokio::test]
    async fn test_abort_without_session() {
        let mut h = harness();
        assert!(matches!(h.dispatcher.abort(), Err(DispatchError::NoSession)));
    }

    #[tokio::test]
    async fn test_transport_open_failure_creates_no_session() {
        let mut h = harness();
        h.link
            .fail_next_open(TransportError::OpenFailed("aux0 busy".to_string()));

        let err = h
            .dispatcher
            .dispatch(ModuleId::PanelFirmware)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        assert_eq!(h.dispatcher.panel_phase(), None);
        assert!(h.reporter.contains("aux0 busy"));
    }

    #[tokio::test]
    async fn test_wireless_firmware_sent_from_sys_dir() {
        let mut h = harness_with(config(), SimulatedWireless::new().with_busy_checks(1));
        h.dispatcher
            .dispatch(ModuleId::WirelessFirmware)
            .await
            .unwrap();

        assert_eq!(
            h.wireless.uploads(),
            vec![WirelessUpload {
                file: "WirelessServer.bin".to_string(),
                directory: PathBuf::from("sys"),
                address: 0,
            }]
        );
        assert!(!h.dispatcher.is_ready());
        assert!(h.dispatcher.is_ready());
    }

    #[tokio::test]
    async fn test_external_wireless_resets_for_upload() {
        let mut h = harness();
        h.dispatcher
            .dispatch(ModuleId::WirelessFirmwareExternal)
            .await
            .unwrap();
        assert_eq!(h.wireless.resets(), vec![true]);
        assert!(h.wireless.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_wireless_error_reported() {
        let mut h = harness();
        h.wireless
            .fail_next(WirelessError::NoResponse("no sync".to_string()));

        let err = h
            .dispatcher
            .dispatch(ModuleId::WirelessFirmware)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Wireless(_)));
        assert!(h.reporter.contains("no sync"));
    }

    #[tokio::test]
    async fn test_missing_uploader_is_unavailable() {
        let storage = Arc::new(MemoryStorage::new());
        let link = Arc::new(SimulatedPanelLink::new(SimulatedPanel::new(64, 8)));
        let mut dispatcher = ModuleDispatcher::new(
            config(),
            storage,
            Arc::new(RecordingReporter::new()),
            link,
        );

        assert!(dispatcher.is_ready());
        assert!(matches!(
            dispatcher.dispatch(ModuleId::WirelessFirmware).await,
            Err(DispatchError::WirelessUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_disabled_wireless_is_skipped() {
        let mut config = config();
        config.wireless.enabled = false;
        let mut h = harness_with(config, SimulatedWireless::new().with_busy_checks(5));

        h.dispatcher
            .dispatch(ModuleId::WirelessFirmware)
            .await
            .unwrap();
        h.dispatcher
            .dispatch(ModuleId::WirelessFirmwareExternal)
            .await
            .unwrap();
        assert!(h.wireless.uploads().is_empty());
        assert!(h.wireless.resets().is_empty());
        assert!(h.dispatcher.is_ready());
    }

    #[tokio::test]
    async fn test_dispatch_all_validates_before_dispatching() {
        let mut h = harness();
        h.storage.remove("sys", "WirelessServer.bin");
        let request = ModuleBitmap::from(ModuleId::WirelessFirmware).with(ModuleId::PanelFirmware);

        let err = h.dispatcher.dispatch_all(request).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Validation(ValidationError::FileNotFound(ref name)) if name == "WirelessServer.bin"
        ));
        assert_eq!(h.dispatcher.panel_phase(), None);
        assert_eq!(h.link.open_count(), 0);
        assert!(h.wireless.uploads().is_empty());
        assert!(h.panel.ops().is_empty());
        assert_eq!(h.reporter.errors(), vec!["File WirelessServer.bin not found"]);
    }

    #[tokio::test]
    async fn test_dispatch_all_rejects_both_wireless_modules() {
        let mut h = harness();
        let request = ModuleBitmap::from(ModuleId::WirelessFirmware)
            .with(ModuleId::WirelessFirmwareExternal)
            .with(ModuleId::PanelFirmware);

        assert!(matches!(
            h.dispatcher.dispatch_all(request).await,
            Err(UpdateError::Validation(ValidationError::InvalidCombination))
        ));
        assert!(h.wireless.uploads().is_empty());
        assert!(h.wireless.resets().is_empty());
        assert_eq!(h.link.open_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_all_runs_every_module_and_ignores_unknown_bits() {
        let mut h = harness();
        let request = ModuleBitmap::from_bits(
            ModuleId::WirelessFirmware.mask() | ModuleId::PanelFirmware.mask() | 0b0100_0100,
        );

        h.dispatcher.dispatch_all(request).await.unwrap();
        assert_eq!(h.wireless.uploads().len(), 1);
        assert_eq!(h.dispatcher.panel_phase(), Some(Phase::Connecting));
    }
}
