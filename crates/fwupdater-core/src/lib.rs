//! fwupdater-core - Core types and traits for firmware update sessions
//!
//! This crate provides the vocabulary shared by the updater crates: the
//! fixed set of update modules, the phases of a panel flash session, and
//! the traits through which the updater reaches its collaborators (serial
//! link, bootloader protocol client, wireless uploader, storage and the
//! operator reporting channel).

pub mod error;
pub mod module;
pub mod phase;
pub mod ports;
pub mod transport;

pub use error::{BootloaderError, StorageError, WirelessError};
pub use module::{ModuleBitmap, ModuleId};
pub use phase::{FlashProgress, Phase, SessionFailure, SessionOutcome};
pub use ports::{
    BootloaderClient, FlashDescriptor, PanelLink, Reporter, Severity, Storage, WirelessUploader,
};
pub use transport::{SerialTransport, TransportError};
