//! Bridges interleaved host buffers to a [`PeriodHandler`].
//!
//! Host callbacks hand over typed slices of whatever length the backend
//! chose. The driver slices them into periods of at most `period_frames`,
//! converts samples to native-endian bytes in preallocated scratch and runs
//! the handler over [`SampleView`]s of that scratch. Nothing here allocates
//! or blocks once constructed.

use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use audio_transfer_core::models::audio_models::{Layout, PeriodFormat};
use audio_transfer_core::processing::layout::{DeviceLayout, SampleView, SampleViewMut};
use audio_transfer_core::traits::callback_client::{Period, PeriodHandler};

/// Periods of capture the duplex bridge can hold before dropping input.
pub const BRIDGE_PERIODS: usize = 8;

/// Slot shared between the client and its stream callbacks.
pub type HandlerSlot = Arc<Mutex<Option<Box<dyn PeriodHandler>>>>;

/// A host sample type with a fixed native-endian byte encoding.
pub trait WireSample: Copy + Send + 'static {
    const SIZE: usize;
    const SILENCE: Self;

    fn put(self, out: &mut [u8]);
    fn take(bytes: &[u8]) -> Self;
}

impl WireSample for f32 {
    const SIZE: usize = 4;
    const SILENCE: Self = 0.0;

    fn put(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }

    fn take(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl WireSample for i32 {
    const SIZE: usize = 4;
    const SILENCE: Self = 0;

    fn put(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }

    fn take(bytes: &[u8]) -> Self {
        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl WireSample for i16 {
    const SIZE: usize = 2;
    const SILENCE: Self = 0;

    fn put(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }

    fn take(bytes: &[u8]) -> Self {
        i16::from_ne_bytes([bytes[0], bytes[1]])
    }
}

fn to_bytes<T: WireSample>(samples: &[T], out: &mut [u8]) {
    for (sample, slot) in samples.iter().zip(out.chunks_exact_mut(T::SIZE)) {
        sample.put(slot);
    }
}

fn from_bytes<T: WireSample>(bytes: &[u8], out: &mut [T]) {
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(T::SIZE)) {
        *slot = T::take(chunk);
    }
}

/// Capture side of the duplex bridge: runs in the input stream callback.
pub struct CaptureFeed {
    producer: HeapProd<u8>,
    scratch: Vec<u8>,
    frame_bytes: usize,
    dropped_frames: u64,
}

impl CaptureFeed {
    /// Push whole frames; whatever does not fit is dropped.
    pub fn push<T: WireSample>(&mut self, data: &[T]) {
        let samples_per_chunk = self.scratch.len() / T::SIZE;
        for chunk in data.chunks(samples_per_chunk.max(1)) {
            let len = chunk.len() * T::SIZE;
            to_bytes(chunk, &mut self.scratch[..len]);
            let room = self.producer.vacant_len() / self.frame_bytes * self.frame_bytes;
            let n = len.min(room);
            self.producer.push_slice(&self.scratch[..n]);
            self.dropped_frames += ((len - n) / self.frame_bytes) as u64;
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

/// Runs the handler once per period on behalf of one stream.
pub struct PeriodDriver {
    handler: HandlerSlot,
    format: PeriodFormat,
    in_bytes: Vec<u8>,
    out_bytes: Vec<u8>,
    bridge: Option<HeapCons<u8>>,
    starved_frames: u64,
}

impl PeriodDriver {
    pub fn new(handler: HandlerSlot, format: PeriodFormat) -> Self {
        let ss = format.format.sample_size();
        Self {
            handler,
            in_bytes: vec![0; format.period_frames * format.capture_channels * ss],
            out_bytes: vec![0; format.period_frames * format.playback_channels * ss],
            format,
            bridge: None,
            starved_frames: 0,
        }
    }

    /// Build an output-driven driver whose input comes from a capture
    /// stream through a lock-free ring.
    pub fn duplex(handler: HandlerSlot, format: PeriodFormat) -> (Self, CaptureFeed) {
        let frame_bytes = format.capture_channels.max(1) * format.format.sample_size();
        let capacity = format.period_frames * BRIDGE_PERIODS * frame_bytes;
        let (producer, consumer) = HeapRb::<u8>::new(capacity.max(frame_bytes)).split();
        let mut driver = Self::new(handler, format);
        driver.bridge = Some(consumer);
        let feed = CaptureFeed {
            producer,
            scratch: vec![0; format.period_frames * frame_bytes],
            frame_bytes,
            dropped_frames: 0,
        };
        (driver, feed)
    }

    pub fn format(&self) -> &PeriodFormat {
        &self.format
    }

    /// Input frames the duplex bridge could not supply and that were
    /// replaced by silence.
    pub fn starved_frames(&self) -> u64 {
        self.starved_frames
    }

    /// Fill a host output buffer, one period at a time.
    pub fn render<T: WireSample>(&mut self, data: &mut [T]) {
        let channels = self.format.playback_channels;
        if channels == 0 {
            data.fill(T::SILENCE);
            return;
        }
        let period_samples = self.format.period_frames * channels;
        for chunk in data.chunks_mut(period_samples) {
            let frames = chunk.len() / channels;
            if frames == 0 || !self.run_output(frames) {
                chunk.fill(T::SILENCE);
                continue;
            }
            from_bytes(&self.out_bytes[..chunk.len() * T::SIZE], chunk);
        }
    }

    /// Feed a host input buffer, one period at a time.
    pub fn capture<T: WireSample>(&mut self, data: &[T]) {
        let channels = self.format.capture_channels;
        if channels == 0 {
            return;
        }
        let period_samples = self.format.period_frames * channels;
        for chunk in data.chunks(period_samples) {
            let frames = chunk.len() / channels;
            if frames == 0 {
                continue;
            }
            let len = chunk.len() * T::SIZE;
            to_bytes(chunk, &mut self.in_bytes[..len]);
            self.run_input(frames);
        }
    }

    fn run_input(&mut self, frames: usize) {
        let Some(mut slot) = self.handler.try_lock() else {
            return;
        };
        let Some(handler) = slot.as_mut() else {
            return;
        };
        let ss = self.format.format.sample_size();
        let device = DeviceLayout::new(Layout::Interleaved, self.format.capture_channels);
        let len = frames * self.format.capture_channels * ss;
        let Ok(input) = SampleView::new(&self.in_bytes[..len], device, frames, ss) else {
            return;
        };
        let mut period = Period {
            frames,
            input: Some(input),
            output: None,
        };
        handler.process(&mut period);
    }

    fn run_output(&mut self, frames: usize) -> bool {
        let ss = self.format.format.sample_size();
        let in_len = frames * self.format.capture_channels * ss;
        if let Some(bridge) = self.bridge.as_mut() {
            let frame_bytes = self.format.capture_channels.max(1) * ss;
            let ready = bridge.occupied_len() / frame_bytes * frame_bytes;
            let got = bridge.pop_slice(&mut self.in_bytes[..in_len.min(ready)]);
            self.in_bytes[got..in_len].fill(0);
            self.starved_frames += ((in_len - got) / frame_bytes) as u64;
        }

        let Some(mut slot) = self.handler.try_lock() else {
            return false;
        };
        let Some(handler) = slot.as_mut() else {
            return false;
        };
        let out_len = frames * self.format.playback_channels * ss;
        let out_device = DeviceLayout::new(Layout::Interleaved, self.format.playback_channels);
        let Ok(output) = SampleViewMut::new(&mut self.out_bytes[..out_len], out_device, frames, ss) else {
            return false;
        };
        let input = if self.bridge.is_some() {
            let in_device = DeviceLayout::new(Layout::Interleaved, self.format.capture_channels);
            SampleView::new(&self.in_bytes[..in_len], in_device, frames, ss).ok()
        } else {
            None
        };
        let mut period = Period {
            frames,
            input,
            output: Some(output),
        };
        handler.process(&mut period);
        true
    }
}
