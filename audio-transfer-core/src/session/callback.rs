use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::endpoint::{CaptureTarget, LinearCapture, PlaybackCursor, TriggeredCapture};
use super::negotiate::negotiate_client;
use super::poll_loop::check_request;
use super::run_state::{CancelHandle, RunState};
use crate::models::audio_models::{Direction, PeriodFormat, SessionRole, TransferDiagnostics};
use crate::models::config::StreamConfig;
use crate::models::error::{Result, TransferError};
use crate::models::recording_result::TransferResult;
use crate::models::state::TransferOutcome;
use crate::processing::buffer::AppBuffer;
use crate::processing::codec::SampleCodec;
use crate::processing::layout::{SampleView, SampleViewMut};
use crate::traits::callback_client::{CallbackClient, Period, PeriodHandler};

const WAIT_POLL: Duration = Duration::from_millis(5);

/// Fill one output period from the cursor, padding with silence.
///
/// Nothing is taken from the buffer once the session is cancelled or
/// finished; the whole period is then silence.
fn render_period(
    cursor: &mut PlaybackCursor,
    codec: &SampleCodec,
    run: &RunState,
    frames: usize,
    out: &mut SampleViewMut<'_>,
) {
    let n = if run.should_advance() {
        cursor.render(codec, out, 0, frames)
    } else {
        0
    };
    out.fill_silence(n, frames - n);
    if n > 0 {
        cursor.advance(n);
        run.set_frames_played(cursor.completed());
    }
}

/// Take one input period into the capture target. Returns true once the
/// target is complete.
fn capture_period(
    target: &mut CaptureTarget,
    codec: &SampleCodec,
    run: &RunState,
    frames: usize,
    input: &SampleView<'_>,
) -> bool {
    if !run.should_advance() {
        return target.is_done();
    }
    let n = frames.min(target.wanted());
    if let Some(event) = target.absorb(codec, input, 0, n) {
        run.mark_triggered(event.frame);
    }
    target.commit(n);
    run.set_frames_recorded(target.completed());
    if let Some(position) = target.ring_position() {
        run.set_ring_position(position);
    }
    target.is_done()
}

/// Plays a caller buffer once, then emits silence.
pub(crate) struct PlaybackHandler {
    cursor: PlaybackCursor,
    codec: SampleCodec,
    run: Arc<RunState>,
    periods: u64,
}

impl PeriodHandler for PlaybackHandler {
    fn process(&mut self, period: &mut Period<'_>) {
        self.periods += 1;
        let Some(out) = period.output.as_mut() else {
            return;
        };
        render_period(&mut self.cursor, &self.codec, &self.run, period.frames, out);
        if self.cursor.remaining() == 0 && !self.run.is_finished() {
            self.run.finish();
        }
    }

    fn sample_rate_changed(&mut self, sample_rate: u32) {
        self.run.set_sample_rate(sample_rate);
    }

    fn shutdown(&mut self) {
        self.run.mark_shutdown();
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Records into a linear buffer or a trigger ring.
pub(crate) struct CaptureHandler {
    target: CaptureTarget,
    codec: SampleCodec,
    run: Arc<RunState>,
    priming_left: usize,
    periods: u64,
}

impl PeriodHandler for CaptureHandler {
    fn process(&mut self, period: &mut Period<'_>) {
        self.periods += 1;
        let Some(input) = period.input.as_ref() else {
            return;
        };
        if self.priming_left > 0 {
            self.priming_left -= 1;
            return;
        }
        if capture_period(&mut self.target, &self.codec, &self.run, period.frames, input)
            && !self.run.is_finished()
        {
            self.run.finish();
        }
    }

    fn sample_rate_changed(&mut self, sample_rate: u32) {
        self.run.set_sample_rate(sample_rate);
    }

    fn shutdown(&mut self) {
        self.run.mark_shutdown();
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Plays and records in the same period. Capture decides completion.
pub(crate) struct DuplexHandler {
    cursor: PlaybackCursor,
    target: CaptureTarget,
    codec: SampleCodec,
    run: Arc<RunState>,
    priming_left: usize,
    periods: u64,
}

impl PeriodHandler for DuplexHandler {
    fn process(&mut self, period: &mut Period<'_>) {
        self.periods += 1;
        if let Some(out) = period.output.as_mut() {
            render_period(&mut self.cursor, &self.codec, &self.run, period.frames, out);
        }
        let Some(input) = period.input.as_ref() else {
            return;
        };
        if self.priming_left > 0 {
            self.priming_left -= 1;
            return;
        }
        if capture_period(&mut self.target, &self.codec, &self.run, period.frames, input)
            && !self.run.is_finished()
        {
            self.run.finish();
        }
    }

    fn sample_rate_changed(&mut self, sample_rate: u32) {
        self.run.set_sample_rate(sample_rate);
    }

    fn shutdown(&mut self) {
        self.run.mark_shutdown();
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Session driven by a callback runtime's period clock.
///
/// The handler does all per-period work on the runtime's thread without
/// locking or allocating; the owner polls [`finished`](Self::finished) or
/// blocks in [`wait`](Self::wait), then calls [`close`](Self::close) to
/// deactivate the client and get the buffers back.
pub struct CallbackSession<C: CallbackClient> {
    id: Uuid,
    role: SessionRole,
    client: C,
    format: PeriodFormat,
    run: Arc<RunState>,
    connections: Vec<(Direction, usize, String)>,
    active: bool,
}

impl<C: CallbackClient> CallbackSession<C> {
    /// Play `buffer` once; periods after the last frame are silence.
    pub fn play(client: C, buffer: AppBuffer, config: &StreamConfig) -> Result<Self> {
        check_request(config, buffer.frames(), buffer.channels())?;
        let channels = buffer.channels();
        Self::open(SessionRole::Play, client, config, channels, 0, |format, run| {
            Box::new(PlaybackHandler {
                cursor: PlaybackCursor::new(buffer, format.layout),
                codec: SampleCodec::new(format.format),
                run,
                periods: 0,
            })
        })
    }

    /// Record exactly `frames` frames of `channels` channels.
    pub fn record(client: C, frames: usize, channels: usize, config: &StreamConfig) -> Result<Self> {
        check_request(config, frames, channels)?;
        let buffer = AppBuffer::silent(frames, channels)?;
        let priming = config.priming_periods;
        Self::open(SessionRole::Record, client, config, 0, channels, |format, run| {
            Box::new(CaptureHandler {
                target: CaptureTarget::Linear(LinearCapture::new(buffer, format.layout)),
                codec: SampleCodec::new(format.format),
                run,
                priming_left: priming,
                periods: 0,
            })
        })
    }

    /// Record into a ring of `frames` frames until `config.trigger` fires
    /// and its post-trigger quota is met.
    pub fn record_triggered(client: C, frames: usize, channels: usize, config: &StreamConfig) -> Result<Self> {
        check_request(config, frames, channels)?;
        let trigger = config
            .trigger
            .as_ref()
            .ok_or_else(|| TransferError::invalid_config("triggered recording needs trigger settings"))?;
        let capture = TriggeredCapture::new(frames, channels, trigger, config.period_frames)?;
        let priming = config.priming_periods;
        Self::open(SessionRole::TriggeredRecord, client, config, 0, channels, |format, run| {
            Box::new(CaptureHandler {
                target: CaptureTarget::Triggered(capture),
                codec: SampleCodec::new(format.format),
                run,
                priming_left: priming,
                periods: 0,
            })
        })
    }

    /// Play `buffer` while recording `record_frames` frames. Completion is
    /// decided by the recording.
    pub fn play_record(
        client: C,
        buffer: AppBuffer,
        record_frames: usize,
        record_channels: usize,
        config: &StreamConfig,
    ) -> Result<Self> {
        check_request(config, buffer.frames(), buffer.channels())?;
        check_request(config, record_frames, record_channels)?;
        let capture_buffer = AppBuffer::silent(record_frames, record_channels)?;
        let play_channels = buffer.channels();
        let priming = config.priming_periods;
        Self::open(
            SessionRole::PlayRecord,
            client,
            config,
            play_channels,
            record_channels,
            |format, run| {
                Box::new(DuplexHandler {
                    cursor: PlaybackCursor::new(buffer, format.layout),
                    target: CaptureTarget::Linear(LinearCapture::new(capture_buffer, format.layout)),
                    codec: SampleCodec::new(format.format),
                    run,
                    priming_left: priming,
                    periods: 0,
                })
            },
        )
    }

    fn open(
        role: SessionRole,
        mut client: C,
        config: &StreamConfig,
        playback_channels: usize,
        capture_channels: usize,
        build: impl FnOnce(&PeriodFormat, Arc<RunState>) -> Box<dyn PeriodHandler>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let format = negotiate_client(&mut client, config, playback_channels, capture_channels)?;

        let mut wanted = Vec::new();
        for ch in 0..playback_channels {
            let port = client.register_port(Direction::Playback, &format!("out_{}", ch + 1))?;
            if let Some(peer) = config.playback_ports.get(ch) {
                wanted.push((Direction::Playback, port, peer.clone()));
            }
        }
        for ch in 0..capture_channels {
            let port = client.register_port(Direction::Capture, &format!("in_{}", ch + 1))?;
            if let Some(peer) = config.capture_ports.get(ch) {
                wanted.push((Direction::Capture, port, peer.clone()));
            }
        }

        let run = RunState::new();
        run.start(format.sample_rate);
        let handler = build(&format, run.clone());
        client.activate(handler)?;

        let mut session = Self {
            id,
            role,
            client,
            format,
            run,
            connections: Vec::new(),
            active: true,
        };
        // Ports can only be connected once the client is active. A failure
        // here drops the session, which deactivates the client.
        for (direction, port, peer) in wanted {
            session.client.connect(direction, port, &peer)?;
            session.connections.push((direction, port, peer));
        }

        log::info!(
            "[{}] {} session active on {} ({} {:?}, {} Hz, {} frames/period)",
            id,
            role,
            session.client.name(),
            format.format,
            format.layout,
            format.sample_rate,
            format.period_frames
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn format(&self) -> &PeriodFormat {
        &self.format
    }

    /// Current runtime sample rate, updated by rate-change notifications.
    pub fn sample_rate(&self) -> u32 {
        self.run.sample_rate()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.run.clone())
    }

    pub fn request_cancel(&self) {
        self.run.request_cancel();
    }

    pub fn finished(&self) -> bool {
        self.run.is_finished()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    pub fn got_a_trigger(&self) -> bool {
        self.run.got_trigger()
    }

    pub fn ring_position(&self) -> usize {
        self.run.ring_position()
    }

    pub fn frames_played(&self) -> usize {
        self.run.frames_played()
    }

    pub fn frames_recorded(&self) -> usize {
        self.run.frames_recorded()
    }

    /// How the session ended, or `None` while it is still transferring.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        if self.run.is_finished() {
            Some(TransferOutcome::Completed)
        } else if self.run.is_shutdown() {
            Some(TransferOutcome::Shutdown)
        } else if !self.run.is_running() {
            Some(TransferOutcome::Cancelled)
        } else {
            None
        }
    }

    /// Block until the session ends or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<TransferOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.outcome() {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(WAIT_POLL.min(deadline - now));
        }
    }

    /// Disconnect ports, deactivate the client and return the buffers.
    pub fn close(mut self) -> Result<TransferResult> {
        let outcome = self.outcome().unwrap_or(TransferOutcome::Cancelled);
        let handler = self.deactivate()?;

        let mut result = TransferResult {
            session_id: self.id,
            role: self.role,
            outcome,
            format: self.format.format,
            frames_played: 0,
            frames_recorded: 0,
            playback: None,
            capture: None,
            trigger: None,
            diagnostics: TransferDiagnostics::default(),
        };

        let any = handler.into_any();
        let any = match any.downcast::<PlaybackHandler>() {
            Ok(h) => {
                let h = *h;
                result.diagnostics.iterations = h.periods;
                result.frames_played = h.cursor.completed();
                result.playback = Some(h.cursor.into_buffer());
                return Ok(self.finish_close(result));
            }
            Err(any) => any,
        };
        let any = match any.downcast::<CaptureHandler>() {
            Ok(h) => {
                let h = *h;
                result.diagnostics.iterations = h.periods;
                self.fill_capture(&mut result, h.target)?;
                return Ok(self.finish_close(result));
            }
            Err(any) => any,
        };
        match any.downcast::<DuplexHandler>() {
            Ok(h) => {
                let h = *h;
                result.diagnostics.iterations = h.periods;
                result.frames_played = h.cursor.completed();
                result.playback = Some(h.cursor.into_buffer());
                self.fill_capture(&mut result, h.target)?;
                Ok(self.finish_close(result))
            }
            Err(_) => Err(TransferError::client("client returned a foreign period handler")),
        }
    }

    fn fill_capture(&self, result: &mut TransferResult, target: CaptureTarget) -> Result<()> {
        result.frames_recorded = target.completed();
        if let CaptureTarget::Triggered(ref triggered) = target {
            result.trigger = triggered.report(self.id);
        }
        result.capture = Some(target.into_buffer()?);
        Ok(())
    }

    fn finish_close(&self, result: TransferResult) -> TransferResult {
        log::info!("[{}] {} session closed: {:?}", self.id, self.role, result.outcome);
        result
    }

    fn deactivate(&mut self) -> Result<Box<dyn PeriodHandler>> {
        for (direction, port, peer) in self.connections.drain(..) {
            if let Err(e) = self.client.disconnect(direction, port, &peer) {
                log::warn!("[{}] failed to disconnect {:?} port {} from {}: {}", self.id, direction, port, peer, e);
            }
        }
        self.active = false;
        self.run.stop();
        self.client.deactivate()
    }
}

impl<C: CallbackClient> Drop for CallbackSession<C> {
    fn drop(&mut self) {
        if self.active {
            self.run.request_cancel();
            if let Err(e) = self.deactivate() {
                log::warn!("[{}] deactivate on drop failed: {}", self.id, e);
            }
        }
    }
}
