//! Panel flash session phases and progress

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of a panel flash session.
///
/// # Lifecycle
///
/// ```text
/// Idle → Connecting → Identifying → Erasing → Writing → Verifying → Finalizing → Resetting → Complete
///   │         │            │            │         │          │            │
///   └─────────┴────────────┴─── Failed(reason) ◄──┴──────────┴────────────┘
/// ```
///
/// Phases only move forward. `Complete` and `Failed` are terminal.
///
/// # Abort rules
///
/// - **Abortable**: `Idle`, `Connecting`, `Identifying` (nothing on the panel has changed yet)
/// - **Not abortable**: `Erasing` onward. Once the erase has started the panel
///   cannot boot until a full write and verify succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    /// Session created, no hardware touched
    Idle,
    /// Bootloader handshake over the serial link
    Connecting,
    /// Reading the device identity and flash layout
    Identifying,
    /// Unlocking and erasing the flash region from offset 0
    Erasing,
    /// Streaming the image into the erased region
    Writing,
    /// Reading back and comparing against the image
    Verifying,
    /// Writing post-flash options such as boot-lock bits
    Finalizing,
    /// Restarting the panel into its new firmware
    Resetting,
    /// Terminal: the panel runs the new firmware
    Complete,
    /// Terminal: the session stopped in the named phase
    Failed(SessionFailure),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed(_))
    }

    /// True while no irreversible hardware operation has been issued
    pub fn is_abortable(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Connecting | Phase::Identifying)
    }

    /// Position in the forward ordering; `Failed` sorts after everything
    pub fn ordinal(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Connecting => 1,
            Phase::Identifying => 2,
            Phase::Erasing => 3,
            Phase::Writing => 4,
            Phase::Verifying => 5,
            Phase::Finalizing => 6,
            Phase::Resetting => 7,
            Phase::Complete => 8,
            Phase::Failed(_) => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Identifying => "identifying",
            Phase::Erasing => "erasing",
            Phase::Writing => "writing",
            Phase::Verifying => "verifying",
            Phase::Finalizing => "finalizing",
            Phase::Resetting => "resetting",
            Phase::Complete => "complete",
            Phase::Failed(_) => "failed",
        }
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Phase::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Why a session ended in [`Phase::Failed`].
///
/// The `Display` output is the operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFailure {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("device identification error: {0}")]
    Identify(String),

    #[error("erase error: {0}")]
    Erase(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("verify failed: read-back error: {0}")]
    ReadBack(String),

    #[error("verify failed: page errors {page_errors}, byte errors {total_errors}")]
    Verify { page_errors: u32, total_errors: u32 },

    #[error("option write error: {0}")]
    Finalize(String),

    #[error("aborted before erase")]
    Aborted,
}

/// Counters accumulated over a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashProgress {
    /// Pages in the flash region reported by the device
    pub pages_total: u32,
    /// Page size in bytes reported by the device
    pub page_size: u32,
    /// Size of the firmware image in bytes (0 until Writing loads it)
    pub image_bytes: u32,
    pub pages_erased: u32,
    pub pages_written: u32,
    pub bytes_written: u32,
    pub pages_verified: u32,
    /// Pages with at least one byte differing from the image
    pub page_errors: u32,
    /// Bytes differing from the image
    pub total_errors: u32,
}

impl FlashProgress {
    /// Pages the image occupies
    pub fn image_pages(&self) -> u32 {
        if self.page_size == 0 {
            0
        } else {
            self.image_bytes.div_ceil(self.page_size)
        }
    }

    /// Rough completion over erase, write and verify work (0.0 - 100.0)
    pub fn percent(&self) -> f64 {
        let image_pages = self.image_pages();
        let total = self.pages_total as u64 + 2 * image_pages as u64;
        if total == 0 {
            return 0.0;
        }
        let done =
            self.pages_erased as u64 + self.pages_written as u64 + self.pages_verified as u64;
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Result of a finished session, kept by the dispatcher until consumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: u64,
    /// Terminal phase (`Complete` or `Failed`)
    pub phase: Phase,
    pub progress: FlashProgress,
    /// True once an erase command was issued; a failed session with this set
    /// has left the panel without runnable firmware
    pub target_erased: bool,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// The panel needs another update before it can be used
    pub fn requires_retry(&self) -> bool {
        !self.succeeded() && self.target_erased
    }
}
