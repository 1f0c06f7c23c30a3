use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audio_models::{SampleFormat, SessionRole, TransferDiagnostics};
use super::state::TransferOutcome;
use crate::processing::buffer::AppBuffer;

/// Result returned when a session is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub session_id: Uuid,
    pub role: SessionRole,
    pub outcome: TransferOutcome,
    pub format: SampleFormat,
    pub frames_played: usize,
    pub frames_recorded: usize,
    /// The playback buffer handed back to its owner.
    pub playback: Option<AppBuffer>,
    /// Captured samples in chronological, channel-major order.
    pub capture: Option<AppBuffer>,
    pub trigger: Option<TriggerReport>,
    pub diagnostics: TransferDiagnostics,
}

impl TransferResult {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_complete()
    }
}

/// Summary of a trigger event.
///
/// Serializable for JSON export alongside the captured data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerReport {
    pub session_id: Uuid,
    /// Stream frame (counted from session start) at the end of the chunk
    /// in which the level crossed the threshold.
    pub trigger_frame: u64,
    pub triggered_at: DateTime<Utc>,
    /// Mean absolute level of the window when it crossed.
    pub level: f64,
    pub threshold: f64,
    pub channel: usize,
    pub pre_trigger_frames: usize,
    pub post_trigger_frames: usize,
}

impl TriggerReport {
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("failed to encode trigger report: {}", e))
    }
}
