use serde::{Deserialize, Serialize};

use super::error::DeviceFault;

/// Poll-driven transfer loop state machine.
///
/// State transitions:
/// ```text
/// wait_ready → query_available → copy_contiguous → commit ─┬→ wait_ready
///      ↓              ↓                 ↓             ↓    └→ done
///      └──────────────┴──── recover ────┴─────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    WaitReady,
    QueryAvailable,
    CopyContiguous,
    Commit,
    Recover(DeviceFault),
    Done,
}

impl TransferState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, Self::Recover(_))
    }
}

/// Trigger detector state machine: armed → triggered → done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPhase {
    Armed,
    Triggered,
    Done,
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    /// Every requested frame was transferred (or the trigger completed).
    Completed,
    /// The run flag was cleared before completion; buffer contents past
    /// the completed frame count are unspecified.
    Cancelled,
    /// The callback runtime shut the client down underneath the session.
    Shutdown,
    /// A fatal fault ended the transfer; `run` returned the error.
    Failed,
}

impl TransferOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }
}
