//! fwupdater-session - Firmware update sessions for a multi-controller device
//!
//! This crate decides which update modules may run together, drives the
//! panel sub-board through its flash phases one bounded step at a time, and
//! hands wireless co-processor work to the wireless uploader.
//!
//! The owning control loop calls [`ModuleDispatcher::poll`] between its other
//! duties; no call blocks longer than one bootloader I/O timeout.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod report;
pub mod session;
pub mod storage;
pub mod testing;
pub mod validator;

pub use config::{PanelConfig, UpdaterConfig, WirelessConfig};
pub use dispatcher::ModuleDispatcher;
pub use error::{ConfigError, DispatchError, UpdateError, ValidationError};
pub use report::TracingReporter;
pub use session::UpdateSession;
pub use storage::FsStorage;
pub use validator::RequestValidator;

// Re-export the shared vocabulary so callers need a single dependency
pub use fwupdater_core::{
    FlashProgress, ModuleBitmap, ModuleId, Phase, SessionFailure, SessionOutcome, Severity,
};
