//! Offset mapping between device memory and the application buffer.
//!
//! Device memory is interleaved (`(base + frame) * channels + channel`) or
//! planar (one region per channel, `base + frame` inside it). The
//! application buffer is always channel-major. Every copy in both transfer
//! loops goes through [`LayoutMapper`] and the typed views below.

use std::ops::Range;

use super::buffer::AppBuffer;
use super::codec::SampleCodec;
use crate::models::audio_models::Layout;
use crate::models::error::{Result, TransferError};

/// Device-side geometry: layout plus channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    pub layout: Layout,
    pub channels: usize,
}

impl DeviceLayout {
    pub fn new(layout: Layout, channels: usize) -> Self {
        Self { layout, channels }
    }

    /// Number of separate device regions the loop must address.
    pub fn regions(&self) -> usize {
        match self.layout {
            Layout::Interleaved => 1,
            Layout::Planar => self.channels,
        }
    }

    /// Region holding `channel`.
    #[inline]
    pub fn region(&self, channel: usize) -> usize {
        match self.layout {
            Layout::Interleaved => 0,
            Layout::Planar => channel,
        }
    }

    /// Sample offset of `(base_frame + frame, channel)` inside its region.
    #[inline]
    pub fn device_offset(&self, base_frame: usize, frame: usize, channel: usize) -> usize {
        match self.layout {
            Layout::Interleaved => (base_frame + frame) * self.channels + channel,
            Layout::Planar => base_frame + frame,
        }
    }
}

/// Bridges device layout and the channel-major application buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutMapper {
    device: DeviceLayout,
    app_frames: usize,
}

impl LayoutMapper {
    pub fn new(layout: Layout, channels: usize, app_frames: usize) -> Self {
        Self {
            device: DeviceLayout::new(layout, channels),
            app_frames,
        }
    }

    pub fn device(&self) -> DeviceLayout {
        self.device
    }

    pub fn layout(&self) -> Layout {
        self.device.layout
    }

    pub fn channels(&self) -> usize {
        self.device.channels
    }

    #[inline]
    pub fn device_offset(&self, base_frame: usize, frame: usize, channel: usize) -> usize {
        self.device.device_offset(base_frame, frame, channel)
    }

    #[inline]
    pub fn app_offset(&self, frame: usize, channel: usize) -> usize {
        channel * self.app_frames + frame
    }

    /// Encode `chunk.frames` frames from `src` into device memory.
    pub fn copy_to_device(
        &self,
        codec: &SampleCodec,
        src: &AppBuffer,
        chunk: &TransferChunk,
        dst: &mut SampleViewMut<'_>,
    ) {
        let samples = src.as_slice();
        match self.layout() {
            Layout::Interleaved => {
                for f in 0..chunk.frames {
                    for c in 0..self.channels() {
                        let sample = samples[self.app_offset(chunk.app_frame + f, c)];
                        dst.write(codec, chunk.device_frame + f, c, sample);
                    }
                }
            }
            Layout::Planar => {
                for c in 0..self.channels() {
                    for f in 0..chunk.frames {
                        let sample = samples[self.app_offset(chunk.app_frame + f, c)];
                        dst.write(codec, chunk.device_frame + f, c, sample);
                    }
                }
            }
        }
    }

    /// Decode `chunk.frames` frames of device memory into `dst`.
    pub fn copy_from_device(
        &self,
        codec: &SampleCodec,
        src: &SampleView<'_>,
        chunk: &TransferChunk,
        dst: &mut AppBuffer,
    ) {
        let samples = dst.as_mut_slice();
        match self.layout() {
            Layout::Interleaved => {
                for f in 0..chunk.frames {
                    for c in 0..self.channels() {
                        samples[self.app_offset(chunk.app_frame + f, c)] =
                            src.read(codec, chunk.device_frame + f, c);
                    }
                }
            }
            Layout::Planar => {
                for c in 0..self.channels() {
                    for f in 0..chunk.frames {
                        samples[self.app_offset(chunk.app_frame + f, c)] =
                            src.read(codec, chunk.device_frame + f, c);
                    }
                }
            }
        }
    }
}

/// One device-buffer interaction: where in device memory, how many frames,
/// and where in the application buffer. Built fresh per loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferChunk {
    pub device_frame: usize,
    pub frames: usize,
    pub app_frame: usize,
}

fn check_len(len: usize, device: &DeviceLayout, frames: usize, sample_size: usize) -> Result<()> {
    let needed = frames * device.channels * sample_size;
    if len < needed {
        return Err(TransferError::Internal(format!(
            "device area holds {} bytes, {} frames × {} channels needs {}",
            len, frames, device.channels, needed
        )));
    }
    Ok(())
}

#[inline]
fn byte_range(device: &DeviceLayout, frames: usize, ss: usize, frame: usize, channel: usize) -> Range<usize> {
    let region_base = device.region(channel) * frames;
    let start = (region_base + device.device_offset(0, frame, channel)) * ss;
    start..start + ss
}

/// Read-only typed view over device memory.
///
/// `frames` is the size of each region (the whole ring for mapped devices,
/// one period for callback clients). Planar regions are laid out one after
/// another.
#[derive(Debug)]
pub struct SampleView<'a> {
    bytes: &'a [u8],
    device: DeviceLayout,
    frames: usize,
    sample_size: usize,
}

impl<'a> SampleView<'a> {
    pub fn new(bytes: &'a [u8], device: DeviceLayout, frames: usize, sample_size: usize) -> Result<Self> {
        check_len(bytes.len(), &device, frames, sample_size)?;
        Ok(Self {
            bytes,
            device,
            frames,
            sample_size,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn device(&self) -> DeviceLayout {
        self.device
    }

    #[inline]
    pub fn read(&self, codec: &SampleCodec, frame: usize, channel: usize) -> f64 {
        let range = byte_range(&self.device, self.frames, self.sample_size, frame, channel);
        codec.read_bytes(&self.bytes[range])
    }
}

/// Mutable typed view over device memory.
#[derive(Debug)]
pub struct SampleViewMut<'a> {
    bytes: &'a mut [u8],
    device: DeviceLayout,
    frames: usize,
    sample_size: usize,
}

impl<'a> SampleViewMut<'a> {
    pub fn new(
        bytes: &'a mut [u8],
        device: DeviceLayout,
        frames: usize,
        sample_size: usize,
    ) -> Result<Self> {
        check_len(bytes.len(), &device, frames, sample_size)?;
        Ok(Self {
            bytes,
            device,
            frames,
            sample_size,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn device(&self) -> DeviceLayout {
        self.device
    }

    #[inline]
    pub fn write(&mut self, codec: &SampleCodec, frame: usize, channel: usize, sample: f64) {
        let range = byte_range(&self.device, self.frames, self.sample_size, frame, channel);
        codec.write_bytes(sample, &mut self.bytes[range]);
    }

    #[inline]
    pub fn read(&self, codec: &SampleCodec, frame: usize, channel: usize) -> f64 {
        let range = byte_range(&self.device, self.frames, self.sample_size, frame, channel);
        codec.read_bytes(&self.bytes[range])
    }

    /// Zero `count` frames starting at `start` on every channel.
    ///
    /// All-zero bytes are silence for every supported format.
    pub fn fill_silence(&mut self, start: usize, count: usize) {
        if count == 0 {
            return;
        }
        let ss = self.sample_size;
        match self.device.layout {
            Layout::Interleaved => {
                let from = start * self.device.channels * ss;
                let to = (start + count) * self.device.channels * ss;
                self.bytes[from..to].fill(0);
            }
            Layout::Planar => {
                for c in 0..self.device.channels {
                    let base = c * self.frames;
                    self.bytes[(base + start) * ss..(base + start + count) * ss].fill(0);
                }
            }
        }
    }

    pub fn as_view(&self) -> SampleView<'_> {
        SampleView {
            bytes: &*self.bytes,
            device: self.device,
            frames: self.frames,
            sample_size: self.sample_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::models::audio_models::SampleFormat;

    #[test]
    fn interleaved_offsets_are_a_bijection() {
        let (frames, channels) = (7, 3);
        let mapper = LayoutMapper::new(Layout::Interleaved, channels, frames);

        let mut device = HashSet::new();
        let mut app = HashSet::new();
        for f in 0..frames {
            for c in 0..channels {
                assert!(device.insert(mapper.device_offset(0, f, c)));
                assert!(app.insert(mapper.app_offset(f, c)));
            }
        }
        let all: HashSet<usize> = (0..frames * channels).collect();
        assert_eq!(device, all);
        assert_eq!(app, all);
    }

    #[test]
    fn planar_offsets_are_a_bijection() {
        let (frames, channels) = (5, 4);
        let mapper = LayoutMapper::new(Layout::Planar, channels, frames);
        let device = mapper.device();
        assert_eq!(device.regions(), channels);

        let mut seen = HashSet::new();
        for f in 0..frames {
            for c in 0..channels {
                let offset = mapper.device_offset(0, f, c);
                assert!(offset < frames);
                assert!(seen.insert((device.region(c), offset)));
            }
        }
        assert_eq!(seen.len(), frames * channels);
    }

    #[test]
    fn base_frame_shifts_interleaved_offset() {
        let mapper = LayoutMapper::new(Layout::Interleaved, 2, 16);
        assert_eq!(mapper.device_offset(3, 1, 1), (3 + 1) * 2 + 1);
        let mapper = LayoutMapper::new(Layout::Planar, 2, 16);
        assert_eq!(mapper.device_offset(3, 1, 1), 4);
    }

    #[test]
    fn copy_round_trip_through_each_layout() {
        let codec = SampleCodec::new(SampleFormat::Float32);
        let src = AppBuffer::from_channels(&[vec![0.1, 0.2, 0.3], vec![-0.1, -0.2, -0.3]]).unwrap();

        for layout in [Layout::Interleaved, Layout::Planar] {
            let mapper = LayoutMapper::new(layout, 2, 3);
            // Device ring of 8 frames, write at device frame 4.
            let mut bytes = vec![0u8; 8 * 2 * 4];
            let chunk = TransferChunk {
                device_frame: 4,
                frames: 3,
                app_frame: 0,
            };
            let mut view = SampleViewMut::new(&mut bytes, mapper.device(), 8, 4).unwrap();
            mapper.copy_to_device(&codec, &src, &chunk, &mut view);

            let mut dst = AppBuffer::silent(3, 2).unwrap();
            mapper.copy_from_device(&codec, &view.as_view(), &chunk, &mut dst);
            for c in 0..2 {
                for f in 0..3 {
                    assert!((dst.get(f, c) - src.get(f, c)).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn interleaved_bytes_are_frame_major() {
        let codec = SampleCodec::new(SampleFormat::Int16);
        let src = AppBuffer::from_channels(&[vec![0.5, 0.25], vec![-0.5, -0.25]]).unwrap();
        let mapper = LayoutMapper::new(Layout::Interleaved, 2, 2);
        let mut bytes = vec![0u8; 2 * 2 * 2];
        {
            let mut view = SampleViewMut::new(&mut bytes, mapper.device(), 2, 2).unwrap();
            let chunk = TransferChunk {
                device_frame: 0,
                frames: 2,
                app_frame: 0,
            };
            mapper.copy_to_device(&codec, &src, &chunk, &mut view);
        }
        let words: Vec<i16> = bytes
            .chunks(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(words, vec![16384, -16384, 8192, -8192]);
    }

    #[test]
    fn undersized_area_is_rejected() {
        let mut bytes = vec![0u8; 10];
        let device = DeviceLayout::new(Layout::Interleaved, 2);
        assert!(SampleViewMut::new(&mut bytes, device, 4, 2).is_err());
    }

    #[test]
    fn fill_silence_planar_touches_every_region() {
        let device = DeviceLayout::new(Layout::Planar, 2);
        let mut bytes = vec![0xFFu8; 4 * 2 * 2];
        let mut view = SampleViewMut::new(&mut bytes, device, 4, 2).unwrap();
        view.fill_silence(1, 2);
        let codec = SampleCodec::new(SampleFormat::Int16);
        for c in 0..2 {
            assert_ne!(view.read(&codec, 0, c), 0.0);
            assert_eq!(view.read(&codec, 1, c), 0.0);
            assert_eq!(view.read(&codec, 2, c), 0.0);
            assert_ne!(view.read(&codec, 3, c), 0.0);
        }
    }
}
