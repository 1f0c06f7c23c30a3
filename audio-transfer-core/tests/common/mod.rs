#![allow(dead_code)]

use audio_transfer_core::{AppBuffer, StreamConfig};

/// Period 64, four periods per ring, fast suspend retries.
pub fn test_config() -> StreamConfig {
    StreamConfig {
        period_frames: 64,
        periods: 4,
        suspend_retry_ms: 1,
        suspend_retry_cap_ms: 4,
        ..StreamConfig::default()
    }
}

/// Distinct per-frame, per-channel values that survive Float32 and Int16
/// exactly.
pub fn ramp(frames: usize, channels: usize) -> AppBuffer {
    let data: Vec<Vec<f64>> = (0..channels)
        .map(|c| {
            (0..frames)
                .map(|f| ((f % 256) as f64 - 128.0) / 256.0 + c as f64 / 1024.0)
                .collect()
        })
        .collect();
    AppBuffer::from_channels(&data).unwrap()
}

/// Channel 0 encodes the frame index; `trigger_channel` is silent until
/// `onset`, then steady at `loud`.
pub fn marked_signal(frames: usize, channels: usize, trigger_channel: usize, onset: usize, loud: f64) -> AppBuffer {
    let data: Vec<Vec<f64>> = (0..channels)
        .map(|c| {
            (0..frames)
                .map(|f| {
                    if c == trigger_channel {
                        if f >= onset {
                            loud
                        } else {
                            0.0
                        }
                    } else {
                        f as f64 / 4096.0
                    }
                })
                .collect()
        })
        .collect();
    AppBuffer::from_channels(&data).unwrap()
}

/// Leading `frames` frames of `buffer`.
pub fn prefix(buffer: &AppBuffer, frames: usize) -> AppBuffer {
    let data: Vec<Vec<f64>> = (0..buffer.channels())
        .map(|c| buffer.channel(c)[..frames].to_vec())
        .collect();
    AppBuffer::from_channels(&data).unwrap()
}

/// Frames `[start, start + frames)` of `buffer`, silence past its end.
pub fn window(buffer: &AppBuffer, start: usize, frames: usize) -> AppBuffer {
    let data: Vec<Vec<f64>> = (0..buffer.channels())
        .map(|c| {
            (start..start + frames)
                .map(|f| if f < buffer.frames() { buffer.get(f, c) } else { 0.0 })
                .collect()
        })
        .collect();
    AppBuffer::from_channels(&data).unwrap()
}
