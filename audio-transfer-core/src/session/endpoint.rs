//! Application-side ends of a transfer: where playback frames come from and
//! where captured frames go. Shared by the poll loop and the period
//! handlers, so none of these types allocate after construction.

use uuid::Uuid;

use crate::models::audio_models::{Direction, Layout};
use crate::models::config::TriggerConfig;
use crate::models::error::{Result, TransferError};
use crate::models::recording_result::TriggerReport;
use crate::models::state::TriggerPhase;
use crate::processing::buffer::AppBuffer;
use crate::processing::codec::SampleCodec;
use crate::processing::layout::{LayoutMapper, SampleView, SampleViewMut, TransferChunk};
use crate::processing::ring_capture::RingCaptureBuffer;
use crate::processing::trigger::{TriggerDetector, TriggerEvent};

/// Playback source: the caller's buffer plus how much of it the device has
/// accepted.
#[derive(Debug)]
pub struct PlaybackCursor {
    buffer: AppBuffer,
    mapper: LayoutMapper,
    completed: usize,
}

impl PlaybackCursor {
    pub fn new(buffer: AppBuffer, layout: Layout) -> Self {
        let mapper = LayoutMapper::new(layout, buffer.channels(), buffer.frames());
        Self {
            buffer,
            mapper,
            completed: 0,
        }
    }

    pub fn requested(&self) -> usize {
        self.buffer.frames()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn remaining(&self) -> usize {
        self.buffer.frames() - self.completed
    }

    /// Encode up to `frames` pending frames at `device_frame`. Returns the
    /// number written; the cursor does not move until [`advance`](Self::advance).
    pub fn render(
        &self,
        codec: &SampleCodec,
        dst: &mut SampleViewMut<'_>,
        device_frame: usize,
        frames: usize,
    ) -> usize {
        let n = frames.min(self.remaining());
        let chunk = TransferChunk {
            device_frame,
            frames: n,
            app_frame: self.completed,
        };
        self.mapper.copy_to_device(codec, &self.buffer, &chunk, dst);
        n
    }

    pub fn advance(&mut self, frames: usize) {
        self.completed = (self.completed + frames).min(self.buffer.frames());
    }

    pub fn into_buffer(self) -> AppBuffer {
        self.buffer
    }
}

/// Capture into a caller-sized linear buffer.
#[derive(Debug)]
pub struct LinearCapture {
    buffer: AppBuffer,
    mapper: LayoutMapper,
    completed: usize,
}

impl LinearCapture {
    /// Capture into `buffer`, overwriting it from the first frame.
    pub fn new(buffer: AppBuffer, layout: Layout) -> Self {
        Self {
            mapper: LayoutMapper::new(layout, buffer.channels(), buffer.frames()),
            buffer,
            completed: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.frames() - self.completed
    }
}

/// Capture into a ring that keeps recording until a level trigger fires
/// and the post-trigger quota is met.
#[derive(Debug)]
pub struct TriggeredCapture {
    ring: RingCaptureBuffer,
    detector: TriggerDetector,
    scratch: Vec<f64>,
    frames_seen: u64,
}

impl TriggeredCapture {
    /// `chunk_frames` bounds the scratch used to hand trigger-channel
    /// samples to the detector; larger chunks are split.
    pub fn new(frames: usize, channels: usize, trigger: &TriggerConfig, chunk_frames: usize) -> Result<Self> {
        trigger
            .validate(channels, frames)
            .map_err(TransferError::InvalidConfig)?;
        let ring = RingCaptureBuffer::new(frames, channels)?;
        let detector = TriggerDetector::new(trigger)?;

        let chunk_frames = chunk_frames.max(1);
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(chunk_frames).map_err(|e| {
            TransferError::exhausted(format!("cannot allocate trigger scratch: {}", e))
        })?;
        scratch.resize(chunk_frames, 0.0);

        Ok(Self {
            ring,
            detector,
            scratch,
            frames_seen: 0,
        })
    }

    pub fn phase(&self) -> TriggerPhase {
        self.detector.phase()
    }

    pub fn ring_position(&self) -> usize {
        self.ring.cursor()
    }

    pub fn detector(&self) -> &TriggerDetector {
        &self.detector
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Store `frames` device frames starting at `device_frame`.
    ///
    /// While armed the ring wraps freely. After the trigger it keeps
    /// wrapping only if it already wrapped once; otherwise it fills to the
    /// end and stops. Frames arriving after completion are discarded.
    /// Returns the event if this call crossed the threshold.
    pub fn absorb(
        &mut self,
        codec: &SampleCodec,
        src: &SampleView<'_>,
        device_frame: usize,
        frames: usize,
    ) -> Option<TriggerEvent> {
        let mut fired = None;
        let mut done = 0;
        let channel = self.detector.channel();

        while done < frames && self.detector.phase() != TriggerPhase::Done {
            let armed = self.detector.phase() == TriggerPhase::Armed;
            let wrap = armed || self.ring.is_wrapped();
            let mut n = (frames - done).min(self.scratch.len());
            if !wrap {
                n = n.min(self.ring.space_to_end());
            }
            if n == 0 {
                break;
            }

            for i in 0..n {
                let frame = device_frame + done + i;
                for c in 0..self.ring.channels() {
                    let sample = src.read(codec, frame, c);
                    if c == channel {
                        self.scratch[i] = sample;
                    }
                    self.ring.store(c, sample);
                }
                self.ring.advance(wrap);
            }

            if armed {
                if self.detector.feed(&self.scratch[..n]) {
                    // The detector counts only frames fed to it; rebase onto
                    // the stream position.
                    fired = self.detector.event().map(|mut e| {
                        e.frame = self.frames_seen + n as u64;
                        e
                    });
                    self.detector.check_done(self.ring.is_wrapped(), self.ring.is_full());
                }
            } else {
                self.detector
                    .advance_post(n, self.ring.is_wrapped(), self.ring.is_full());
            }
            self.frames_seen += n as u64;
            done += n;
        }
        fired
    }

    /// Summarize the trigger, if one fired.
    ///
    /// The ring ends at the last observed frame, so everything after the
    /// trigger frame is post-trigger audio and the rest is pre-trigger.
    pub fn report(&self, session_id: Uuid) -> Option<TriggerReport> {
        let event = self.detector.event()?;
        let stored = self.frames_seen.min(self.ring.capacity() as u64);
        let post = self.frames_seen.saturating_sub(event.frame).min(stored);
        Some(TriggerReport {
            session_id,
            trigger_frame: event.frame,
            triggered_at: event.at,
            level: event.level,
            threshold: self.detector.threshold(),
            channel: self.detector.channel(),
            pre_trigger_frames: (stored - post) as usize,
            post_trigger_frames: post as usize,
        })
    }

    /// Rotate the ring into chronological order and hand it back.
    pub fn into_buffer(mut self) -> Result<AppBuffer> {
        self.ring.unwrap()?;
        Ok(self.ring.into_buffer())
    }
}

/// Where captured frames go.
#[derive(Debug)]
pub enum CaptureTarget {
    Linear(LinearCapture),
    Triggered(TriggeredCapture),
}

impl CaptureTarget {
    /// Frames the target can still take; `usize::MAX` for an unfinished
    /// triggered capture.
    pub fn wanted(&self) -> usize {
        match self {
            Self::Linear(linear) => linear.remaining(),
            Self::Triggered(triggered) if triggered.phase() == TriggerPhase::Done => 0,
            Self::Triggered(_) => usize::MAX,
        }
    }

    pub fn is_done(&self) -> bool {
        self.wanted() == 0
    }

    /// Decode `frames` device frames starting at `device_frame`. Linear
    /// targets take at most [`wanted`](Self::wanted) frames and place them
    /// after the committed ones; they count as captured only once
    /// [`commit`](Self::commit) is called.
    pub fn absorb(
        &mut self,
        codec: &SampleCodec,
        src: &SampleView<'_>,
        device_frame: usize,
        frames: usize,
    ) -> Option<TriggerEvent> {
        match self {
            Self::Linear(linear) => {
                let chunk = TransferChunk {
                    device_frame,
                    frames: frames.min(linear.remaining()),
                    app_frame: linear.completed,
                };
                linear.mapper.copy_from_device(codec, src, &chunk, &mut linear.buffer);
                None
            }
            Self::Triggered(triggered) => triggered.absorb(codec, src, device_frame, frames),
        }
    }

    pub fn commit(&mut self, frames: usize) {
        if let Self::Linear(linear) = self {
            linear.completed = (linear.completed + frames).min(linear.buffer.frames());
        }
    }

    /// Frames captured so far: committed frames for a linear target, frames
    /// observed for a triggered one.
    pub fn completed(&self) -> usize {
        match self {
            Self::Linear(linear) => linear.completed,
            Self::Triggered(triggered) => triggered.frames_seen as usize,
        }
    }

    pub fn ring_position(&self) -> Option<usize> {
        match self {
            Self::Linear(_) => None,
            Self::Triggered(triggered) => Some(triggered.ring_position()),
        }
    }

    /// Hand the captured audio back in chronological order.
    pub fn into_buffer(self) -> Result<AppBuffer> {
        match self {
            Self::Linear(linear) => Ok(linear.buffer),
            Self::Triggered(triggered) => triggered.into_buffer(),
        }
    }
}

/// Either end of a single-direction transfer.
#[derive(Debug)]
pub enum Endpoint {
    Playback(PlaybackCursor),
    Capture(CaptureTarget),
}

impl Endpoint {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Playback(_) => Direction::Playback,
            Self::Capture(_) => Direction::Capture,
        }
    }

    pub fn wanted(&self) -> usize {
        match self {
            Self::Playback(cursor) => cursor.remaining(),
            Self::Capture(target) => target.wanted(),
        }
    }

    pub fn completed(&self) -> usize {
        match self {
            Self::Playback(cursor) => cursor.completed(),
            Self::Capture(target) => target.completed(),
        }
    }

    pub fn commit(&mut self, frames: usize) {
        match self {
            Self::Playback(cursor) => cursor.advance(frames),
            Self::Capture(target) => target.commit(frames),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleFormat;
    use crate::processing::layout::DeviceLayout;

    fn mono_view(bytes: &mut Vec<u8>, codec: &SampleCodec, samples: &[f64]) {
        bytes.clear();
        bytes.resize(samples.len() * codec.sample_size(), 0);
        let mut view =
            SampleViewMut::new(bytes, DeviceLayout::new(Layout::Interleaved, 1), samples.len(), 4).unwrap();
        for (f, &s) in samples.iter().enumerate() {
            view.write(codec, f, 0, s);
        }
    }

    #[test]
    fn playback_cursor_renders_only_remaining_frames() {
        let codec = SampleCodec::new(SampleFormat::Float32);
        let buffer = AppBuffer::from_channels(&[vec![0.5; 10]]).unwrap();
        let mut cursor = PlaybackCursor::new(buffer, Layout::Interleaved);
        cursor.advance(7);

        let mut bytes = vec![0u8; 8 * 4];
        let mut view = SampleViewMut::new(&mut bytes, DeviceLayout::new(Layout::Interleaved, 1), 8, 4).unwrap();
        assert_eq!(cursor.render(&codec, &mut view, 0, 8), 3);
        assert_eq!(view.read(&codec, 2, 0), 0.5);
        assert_eq!(view.read(&codec, 3, 0), 0.0);

        cursor.advance(100);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn linear_capture_counts_only_committed_frames() {
        let codec = SampleCodec::new(SampleFormat::Float32);
        let buffer = AppBuffer::silent(4, 1).unwrap();
        let mut target = CaptureTarget::Linear(LinearCapture::new(buffer, Layout::Interleaved));
        let mut bytes = Vec::new();
        mono_view(&mut bytes, &codec, &[0.25, 0.5, 0.75]);
        let view = SampleView::new(&bytes, DeviceLayout::new(Layout::Interleaved, 1), 3, 4).unwrap();

        target.absorb(&codec, &view, 0, 3);
        assert_eq!(target.completed(), 0);
        target.commit(2);
        assert_eq!(target.wanted(), 2);

        target.absorb(&codec, &view, 1, 3);
        target.commit(2);
        assert!(target.is_done());
        let buffer = target.into_buffer().unwrap();
        assert_eq!(buffer.channel(0), &[0.25, 0.5, 0.5, 0.75]);
    }

    #[test]
    fn triggered_capture_keeps_pre_and_post_trigger_audio() {
        let codec = SampleCodec::new(SampleFormat::Float32);
        let trigger = TriggerConfig {
            level: 0.4,
            channel: 0,
            window_frames: 2,
            post_trigger_frames: 3,
        };
        let mut capture = TriggeredCapture::new(6, 1, &trigger, 4).unwrap();

        let mut samples = vec![0.0; 10];
        samples.extend_from_slice(&[0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);
        let mut bytes = Vec::new();
        mono_view(&mut bytes, &codec, &samples);
        let view = SampleView::new(&bytes, DeviceLayout::new(Layout::Interleaved, 1), samples.len(), 4).unwrap();

        let mut event = None;
        for start in (0..samples.len()).step_by(3) {
            let n = 3.min(samples.len() - start);
            if let Some(e) = capture.absorb(&codec, &view, start, n) {
                event = Some(e);
            }
        }

        let event = event.unwrap();
        assert_eq!(event.frame, 12);
        assert_eq!(capture.phase(), TriggerPhase::Done);
        // Trigger at frame 12, then three post frames: the ring holds frames 9..15.
        assert_eq!(capture.frames_seen(), 15);

        let report = capture.report(Uuid::nil()).unwrap();
        assert_eq!(report.trigger_frame, 12);
        assert_eq!(report.pre_trigger_frames, 3);
        assert_eq!(report.post_trigger_frames, 3);

        let buffer = capture.into_buffer().unwrap();
        assert_eq!(buffer.channel(0), &[0.0, 0.5, 0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn unwrapped_ring_finishes_when_full() {
        let codec = SampleCodec::new(SampleFormat::Float32);
        let trigger = TriggerConfig {
            level: 0.1,
            channel: 0,
            window_frames: 1,
            post_trigger_frames: 0,
        };
        let mut capture = TriggeredCapture::new(5, 1, &trigger, 16).unwrap();
        let samples = [0.9, 0.1, 0.2, 0.3, 0.4, 0.6, 0.7];
        let mut bytes = Vec::new();
        mono_view(&mut bytes, &codec, &samples);
        let view = SampleView::new(&bytes, DeviceLayout::new(Layout::Interleaved, 1), samples.len(), 4).unwrap();

        assert!(capture.absorb(&codec, &view, 0, 1).is_some());
        capture.absorb(&codec, &view, 1, 6);
        assert_eq!(capture.phase(), TriggerPhase::Done);
        assert_eq!(capture.frames_seen(), 5);
        let report = capture.report(Uuid::nil()).unwrap();
        assert_eq!((report.pre_trigger_frames, report.post_trigger_frames), (1, 4));

        let buffer = capture.into_buffer().unwrap();
        let expected: Vec<f64> = samples[..5].iter().map(|&s| s as f32 as f64).collect();
        assert_eq!(buffer.channel(0), expected.as_slice());
    }
}
