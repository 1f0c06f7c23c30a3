use crate::models::error::{Result, TransferError};

/// Caller-owned sample buffer in the canonical application layout.
///
/// Holds `frames × channels` normalized samples, channel-major: channel `c`
/// occupies `[c * frames, (c + 1) * frames)`. Sessions take ownership for
/// the duration of a transfer and hand it back on close.
#[derive(Debug, Clone, PartialEq)]
pub struct AppBuffer {
    samples: Vec<f64>,
    frames: usize,
    channels: usize,
}

impl AppBuffer {
    /// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
    pub fn silent(frames: usize, channels: usize) -> Result<Self> {
        let len = frames
            .checked_mul(channels)
            .ok_or_else(|| TransferError::exhausted("buffer size overflows usize"))?;
        let mut samples = Vec::new();
        samples.try_reserve_exact(len).map_err(|e| {
            TransferError::exhausted(format!("cannot allocate {} samples: {}", len, e))
        })?;
        samples.resize(len, 0.0);
        Ok(Self {
            samples,
            frames,
            channels,
        })
    }

    /// Wrap an existing channel-major sample vector.
    pub fn from_planar(samples: Vec<f64>, frames: usize, channels: usize) -> Result<Self> {
        if frames.checked_mul(channels) != Some(samples.len()) {
            return Err(TransferError::invalid_config(format!(
                "buffer holds {} samples, expected {} frames × {} channels",
                samples.len(),
                frames,
                channels
            )));
        }
        Ok(Self {
            samples,
            frames,
            channels,
        })
    }

    /// Build from one vector per channel. All channels must be equally long.
    pub fn from_channels(channels: &[Vec<f64>]) -> Result<Self> {
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(TransferError::invalid_config("channels differ in length"));
        }
        let samples = channels.concat();
        Self::from_planar(samples, frames, channels.len())
    }

    /// Build from interleaved `[c0f0, c1f0, c0f1, ...]` data.
    pub fn from_interleaved(data: &[f64], channels: usize) -> Result<Self> {
        if channels == 0 || data.len() % channels != 0 {
            return Err(TransferError::invalid_config(format!(
                "{} interleaved samples do not divide into {} channels",
                data.len(),
                channels
            )));
        }
        let frames = data.len() / channels;
        let mut buffer = Self::silent(frames, channels)?;
        for (i, &sample) in data.iter().enumerate() {
            buffer.set(i / channels, i % channels, sample);
        }
        Ok(buffer)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn get(&self, frame: usize, channel: usize) -> f64 {
        self.samples[channel * self.frames + frame]
    }

    #[inline]
    pub fn set(&mut self, frame: usize, channel: usize, sample: f64) {
        self.samples[channel * self.frames + frame] = sample;
    }

    pub fn channel(&self, channel: usize) -> &[f64] {
        &self.samples[channel * self.frames..(channel + 1) * self.frames]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f64] {
        &mut self.samples[channel * self.frames..(channel + 1) * self.frames]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.samples
    }

    /// Interleave into `[c0f0, c1f0, c0f1, c1f1, ...]`.
    pub fn to_interleaved(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.samples.len()];
        for c in 0..self.channels {
            for (f, &sample) in self.channel(c).iter().enumerate() {
                out[f * self.channels + c] = sample;
            }
        }
        out
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_buffer_is_zeroed() {
        let buf = AppBuffer::silent(4, 2).unwrap();
        assert_eq!(buf.len(), 8);
        assert!(buf.as_slice().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn channel_major_addressing() {
        let buf = AppBuffer::from_channels(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buf.get(2, 1), 6.0);
        assert_eq!(buf.channel(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn interleave_round_trip() {
        let buf = AppBuffer::from_channels(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let inter = buf.to_interleaved();
        assert_eq!(inter, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(AppBuffer::from_interleaved(&inter, 2).unwrap(), buf);
    }

    #[test]
    fn unequal_channels_rejected() {
        assert!(AppBuffer::from_channels(&[vec![1.0, 2.0], vec![4.0]]).is_err());
        assert!(AppBuffer::from_planar(vec![0.0; 5], 2, 2).is_err());
        assert!(AppBuffer::from_interleaved(&[0.0; 5], 2).is_err());
    }

    #[test]
    fn oversized_allocation_is_reported() {
        let err = AppBuffer::silent(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, TransferError::ResourceExhausted(_)));
    }
}
