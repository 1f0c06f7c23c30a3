use std::fmt;

use serde::{Deserialize, Serialize};

/// Device-native sample encoding.
///
/// Negotiation tries the requested format first and then falls back along
/// [`SampleFormat::narrower`] until the device accepts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Float32,
    Int32,
    Int16,
}

impl SampleFormat {
    /// Size of one native sample in bytes.
    pub fn sample_size(self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Int16 => 2,
        }
    }

    /// Next format to try when the device refuses this one.
    pub fn narrower(self) -> Option<Self> {
        match self {
            Self::Float32 => Some(Self::Int32),
            Self::Int32 => Some(Self::Int16),
            Self::Int16 => None,
        }
    }

    /// The requested format followed by every fallback, widest first.
    pub fn fallback_chain(self) -> impl Iterator<Item = SampleFormat> {
        std::iter::successors(Some(self), |f| f.narrower())
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float32 => "FLOAT32",
            Self::Int32 => "INT32",
            Self::Int16 => "INT16",
        };
        f.write_str(name)
    }
}

/// Memory layout of multi-channel device data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Channels packed per frame: `[L0, R0, L1, R1, ...]`.
    Interleaved,
    /// One contiguous region per channel.
    Planar,
}

/// Stream direction as seen from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Playback,
    Capture,
}

/// Logical role of a session. Each role has its own run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Play,
    Record,
    TriggeredRecord,
    PlayRecord,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Play => "play",
            Self::Record => "record",
            Self::TriggeredRecord => "triggered-record",
            Self::PlayRecord => "play-record",
        };
        f.write_str(name)
    }
}

/// Hardware parameters requested from, or accepted by, a poll-driven device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub format: SampleFormat,
    pub layout: Layout,
    pub channels: usize,
    pub sample_rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

/// Per-period buffer format agreed with a callback-driven client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodFormat {
    pub format: SampleFormat,
    pub layout: Layout,
    pub playback_channels: usize,
    pub capture_channels: usize,
    pub sample_rate: u32,
    pub period_frames: usize,
}

/// Diagnostics for a finished or running session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDiagnostics {
    pub iterations: u64,
    pub xruns_recovered: u64,
    pub suspends_recovered: u64,
    pub short_commits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_chain_narrows_to_int16() {
        let chain: Vec<_> = SampleFormat::Float32.fallback_chain().collect();
        assert_eq!(
            chain,
            vec![SampleFormat::Float32, SampleFormat::Int32, SampleFormat::Int16]
        );

        let chain: Vec<_> = SampleFormat::Int16.fallback_chain().collect();
        assert_eq!(chain, vec![SampleFormat::Int16]);
    }

    #[test]
    fn sample_sizes() {
        assert_eq!(SampleFormat::Float32.sample_size(), 4);
        assert_eq!(SampleFormat::Int32.sample_size(), 4);
        assert_eq!(SampleFormat::Int16.sample_size(), 2);
    }
}
