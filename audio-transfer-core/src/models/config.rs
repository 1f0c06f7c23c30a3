use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::SampleFormat;

/// Configuration shared by every session type.
///
/// Negotiation with the device may change `format`, `sample_rate` and
/// `period_frames`; the accepted values are reported by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Requested sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Requested device-native sample format (default: Float32).
    pub format: SampleFormat,

    /// Frames per period (default: 1024).
    pub period_frames: usize,

    /// Periods per device ring buffer (default: 4).
    pub periods: usize,

    /// Playback port or device identifiers, one per channel. Empty = default.
    pub playback_ports: Vec<String>,

    /// Capture port or device identifiers, one per channel. Empty = default.
    pub capture_ports: Vec<String>,

    /// Capture periods discarded at stream start (default: 0).
    pub priming_periods: usize,

    /// Sleep between resume attempts of a suspended stream, in ms (default: 100).
    pub suspend_retry_ms: u64,

    /// Upper bound for the resume back-off, in ms (default: 1000).
    pub suspend_retry_cap_ms: u64,

    /// Trigger settings; only read by triggered-record sessions.
    pub trigger: Option<TriggerConfig>,
}

impl StreamConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("malformed stream config: {}", e))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.period_frames == 0 {
            return Err("period size must be positive".into());
        }
        if self.periods < 2 {
            return Err(format!("need at least 2 periods per buffer, got {}", self.periods));
        }
        if self.suspend_retry_ms == 0 || self.suspend_retry_cap_ms < self.suspend_retry_ms {
            return Err("suspend retry interval must be positive and below its cap".into());
        }
        Ok(())
    }

    /// Device ring buffer size in frames.
    pub fn buffer_frames(&self) -> usize {
        self.period_frames * self.periods
    }

    pub fn suspend_retry(&self) -> Duration {
        Duration::from_millis(self.suspend_retry_ms)
    }

    pub fn suspend_retry_cap(&self) -> Duration {
        Duration::from_millis(self.suspend_retry_cap_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            format: SampleFormat::Float32,
            period_frames: 1024,
            periods: 4,
            playback_ports: Vec::new(),
            capture_ports: Vec::new(),
            priming_periods: 0,
            suspend_retry_ms: 100,
            suspend_retry_cap_ms: 1000,
            trigger: None,
        }
    }
}

/// Trigger settings for a triggered-record session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Mean absolute level (0.0–1.0) the window must exceed.
    pub level: f64,

    /// Capture channel the level is measured on.
    pub channel: usize,

    /// Length of the level window in frames.
    pub window_frames: usize,

    /// Frames kept after the trigger; the rest of the ring is pre-trigger.
    pub post_trigger_frames: usize,
}

impl TriggerConfig {
    /// Checks the trigger against the capture geometry it will run on.
    pub fn validate(&self, channels: usize, ring_frames: usize) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.level) {
            return Err(format!("trigger level {} outside 0.0..=1.0", self.level));
        }
        if self.channel >= channels {
            return Err(format!(
                "trigger channel {} out of range for {} channels",
                self.channel, channels
            ));
        }
        if self.window_frames == 0 {
            return Err("trigger window must hold at least one frame".into());
        }
        if ring_frames < self.window_frames {
            return Err(format!(
                "capture length {} is shorter than the trigger window {}",
                ring_frames, self.window_frames
            ));
        }
        if self.post_trigger_frames > ring_frames {
            return Err(format!(
                "post-trigger length {} exceeds capture length {}",
                self.post_trigger_frames, ring_frames
            ));
        }
        Ok(())
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            level: 0.1,
            channel: 0,
            window_frames: 1024,
            post_trigger_frames: 0,
        }
    }
}
