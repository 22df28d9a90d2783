//! Updater errors

use std::path::PathBuf;

use thiserror::Error;

use fwupdater_core::{TransportError, WirelessError};

/// A module request that must not run
///
/// Raised before any hardware action, so a rejection never leaves partial state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid combination of firmware update modules")]
    InvalidCombination,

    #[error("File {0} not found")]
    FileNotFound(String),
}

/// A dispatch or abort request the dispatcher refused
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A panel session already owns the bootloader link
    #[error("update already in progress")]
    SessionActive,

    #[error("no update in progress")]
    NoSession,

    /// The panel has been (or is being) erased; the session must run on
    #[error("cannot abort during {phase}: panel flash has been modified")]
    AbortRefused { phase: String },

    #[error("no wireless uploader available")]
    WirelessUnavailable,

    #[error("wireless update failed: {0}")]
    Wireless(#[from] WirelessError),

    #[error("cannot open panel link: {0}")]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// True for rejections caused by an update already running
    pub fn is_concurrent_session(&self) -> bool {
        matches!(
            self,
            DispatchError::SessionActive | DispatchError::AbortRefused { .. }
        )
    }
}

/// Errors from a full request (validation followed by dispatch)
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
