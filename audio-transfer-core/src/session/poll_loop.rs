use std::sync::Arc;
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use super::endpoint::{CaptureTarget, Endpoint, LinearCapture, PlaybackCursor, TriggeredCapture};
use super::negotiate::negotiate_device;
use super::run_state::{CancelHandle, RunState};
use crate::models::audio_models::{Direction, HwParams, Layout, SessionRole, TransferDiagnostics};
use crate::models::config::StreamConfig;
use crate::models::error::{DeviceFault, Result, TransferError};
use crate::models::recording_result::TransferResult;
use crate::models::state::{TransferOutcome, TransferState};
use crate::processing::buffer::AppBuffer;
use crate::processing::codec::SampleCodec;
use crate::traits::pcm_device::{MappedRegion, PcmDevice, PcmState};
use crate::traits::transfer_delegate::TransferDelegate;

/// Why one loop iteration did not complete.
#[derive(Debug, Clone, PartialEq)]
enum LoopFault {
    Device(DeviceFault),
    ShortCommit { requested: usize, accepted: usize },
}

impl From<DeviceFault> for LoopFault {
    fn from(fault: DeviceFault) -> Self {
        Self::Device(fault)
    }
}

impl From<LoopFault> for TransferError {
    fn from(fault: LoopFault) -> Self {
        match fault {
            LoopFault::Device(fault) => TransferError::Device(fault),
            LoopFault::ShortCommit { requested, accepted } => {
                TransferError::ShortCommit { requested, accepted }
            }
        }
    }
}

/// Poll-driven transfer of one direction over a memory-mapped device.
///
/// Each iteration waits for the device, asks how many frames are
/// available, maps the largest contiguous span it can use, converts
/// directly into or out of device memory and commits. Playback is started
/// by the first commit, capture before the first wait.
///
/// Xruns re-arm the stream, suspends wait for resume with a capped
/// back-off. A short commit is recovered once; a second one in a row ends
/// the transfer. Every other fault drops the stream and is returned.
pub struct PollTransfer<D: PcmDevice> {
    session_id: Uuid,
    device: D,
    params: HwParams,
    codec: SampleCodec,
    endpoint: Endpoint,
    run: Arc<RunState>,
    retry: Duration,
    retry_cap: Duration,
    state: TransferState,
    diagnostics: TransferDiagnostics,
    delegate: Option<Arc<dyn TransferDelegate>>,
    completes_session: bool,
    short_commit_recovered: bool,
}

impl<D: PcmDevice> PollTransfer<D> {
    pub(crate) fn new(
        session_id: Uuid,
        device: D,
        params: HwParams,
        endpoint: Endpoint,
        run: Arc<RunState>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            session_id,
            device,
            params,
            codec: SampleCodec::new(params.format),
            endpoint,
            run,
            retry: config.suspend_retry(),
            retry_cap: config.suspend_retry_cap(),
            state: TransferState::WaitReady,
            diagnostics: TransferDiagnostics::default(),
            delegate: None,
            completes_session: true,
            short_commit_recovered: false,
        }
    }

    /// Let a peer transfer decide completion; this one stops as soon as the
    /// session is finished.
    pub(crate) fn follow_session(&mut self) {
        self.completes_session = false;
    }

    pub(crate) fn set_delegate(&mut self, delegate: Option<Arc<dyn TransferDelegate>>) {
        self.delegate = delegate;
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn params(&self) -> &HwParams {
        &self.params
    }

    pub fn diagnostics(&self) -> &TransferDiagnostics {
        &self.diagnostics
    }

    pub fn frames_completed(&self) -> usize {
        self.endpoint.completed()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub(crate) fn into_endpoint(self) -> Endpoint {
        self.endpoint
    }

    /// Run until every frame is transferred, the trigger completes, or the
    /// run flag is cleared.
    pub fn run(&mut self) -> Result<TransferOutcome> {
        let direction = self.endpoint.direction();
        log::debug!(
            "[{}] {} {:?} transfer starting",
            self.session_id,
            self.device.name(),
            direction
        );

        if direction == Direction::Capture {
            if let Err(fault) = self.device.start() {
                return Err(self.abort(fault.into()));
            }
        }

        let outcome = loop {
            if self.endpoint.wanted() == 0 {
                break TransferOutcome::Completed;
            }
            if !self.completes_session && self.run.is_finished() {
                break TransferOutcome::Completed;
            }
            if !self.run.is_running() {
                break TransferOutcome::Cancelled;
            }

            self.diagnostics.iterations += 1;
            if let Err(fault) = self.iterate() {
                self.recover(fault)?;
            }
        };

        self.set_state(TransferState::Done);
        self.release(direction, outcome);
        if outcome.is_complete() && self.completes_session {
            self.run.finish();
        }
        log::info!(
            "[{}] {} {:?} {:?} after {} frames ({} iterations)",
            self.session_id,
            self.device.name(),
            direction,
            outcome,
            self.endpoint.completed(),
            self.diagnostics.iterations
        );
        if let Some(ref d) = self.delegate {
            d.on_finished(outcome);
        }
        Ok(outcome)
    }

    /// One pass through wait → query → copy → commit.
    fn iterate(&mut self) -> std::result::Result<(), LoopFault> {
        self.set_state(TransferState::WaitReady);
        self.device.wait_ready()?;

        self.set_state(TransferState::QueryAvailable);
        let avail = self.device.avail()?;
        let want = avail.min(self.endpoint.wanted());
        if want == 0 {
            return Ok(());
        }

        self.set_state(TransferState::CopyContiguous);
        let (offset, frames, event) = {
            let MappedRegion {
                mut view,
                offset,
                frames,
            } = self.device.map(want)?;
            let frames = frames.min(want);
            let event = match &mut self.endpoint {
                Endpoint::Playback(cursor) => {
                    cursor.render(&self.codec, &mut view, offset, frames);
                    None
                }
                Endpoint::Capture(target) => target.absorb(&self.codec, &view.as_view(), offset, frames),
            };
            (offset, frames, event)
        };
        if frames == 0 {
            return Ok(());
        }
        if let Some(event) = event {
            self.run.mark_triggered(event.frame);
            log::info!(
                "[{}] trigger at frame {} (level {:.4})",
                self.session_id,
                event.frame,
                event.level
            );
            if let Some(ref d) = self.delegate {
                d.on_trigger(&event);
            }
        }

        self.set_state(TransferState::Commit);
        let accepted = self.device.commit(offset, frames)?.min(frames);
        self.endpoint.commit(accepted);
        self.publish_progress();

        if accepted < frames {
            self.diagnostics.short_commits += 1;
            return Err(LoopFault::ShortCommit {
                requested: frames,
                accepted,
            });
        }
        self.short_commit_recovered = false;

        if self.endpoint.direction() == Direction::Playback && self.device.state() == PcmState::Prepared {
            self.device.start()?;
        }
        Ok(())
    }

    fn recover(&mut self, fault: LoopFault) -> Result<()> {
        let device_fault = match fault {
            LoopFault::Device(DeviceFault::WouldBlock) => return Ok(()),
            LoopFault::Device(ref f) if f.is_transient() => f.clone(),
            LoopFault::ShortCommit { requested, accepted } => {
                if self.short_commit_recovered {
                    return Err(self.abort(fault));
                }
                self.short_commit_recovered = true;
                return self.recover_short_commit(requested, accepted);
            }
            LoopFault::Device(_) => return Err(self.abort(fault)),
        };

        self.set_state(TransferState::Recover(device_fault.clone()));
        let recovered = match device_fault {
            DeviceFault::Suspended => {
                log::warn!("[{}] {} suspended, waiting for resume", self.session_id, self.device.name());
                self.wait_resume()
            }
            _ => {
                log::warn!("[{}] {} xrun, re-preparing", self.session_id, self.device.name());
                self.rearm().map(|()| true)
            }
        };
        match recovered {
            Ok(true) => {}
            // Cancelled mid-wait; the loop reports it on its next check.
            Ok(false) => return Ok(()),
            Err(f) => return Err(self.abort(f.into())),
        }

        match device_fault {
            DeviceFault::Suspended => self.diagnostics.suspends_recovered += 1,
            _ => self.diagnostics.xruns_recovered += 1,
        }
        if let Some(ref d) = self.delegate {
            d.on_fault_recovered(&device_fault);
        }
        Ok(())
    }

    /// The device took fewer frames than mapped. Re-arm and carry on from
    /// the first frame it did not accept.
    fn recover_short_commit(&mut self, requested: usize, accepted: usize) -> Result<()> {
        let fault = DeviceFault::Other(format!("short commit ({} of {} frames)", accepted, requested));
        log::warn!(
            "[{}] {} accepted {} of {} frames, re-preparing",
            self.session_id,
            self.device.name(),
            accepted,
            requested
        );
        self.set_state(TransferState::Recover(fault.clone()));
        if let Err(f) = self.rearm() {
            return Err(self.abort(f.into()));
        }
        if let Some(ref d) = self.delegate {
            d.on_fault_recovered(&fault);
        }
        Ok(())
    }

    /// Prepare the stream again; capture restarts immediately, playback
    /// on its next commit.
    fn rearm(&mut self) -> std::result::Result<(), DeviceFault> {
        self.device.prepare()?;
        if self.endpoint.direction() == Direction::Capture {
            self.device.start()?;
        }
        Ok(())
    }

    /// Retry resume until the device answers. `Ok(false)` means the session
    /// was cancelled before the stream came back.
    fn wait_resume(&mut self) -> std::result::Result<bool, DeviceFault> {
        let mut delay = self.retry;
        loop {
            match self.device.resume() {
                Ok(()) => break,
                Err(DeviceFault::WouldBlock) => {
                    if !self.run.is_running() {
                        log::debug!("[{}] cancelled while waiting for resume", self.session_id);
                        return Ok(false);
                    }
                    thread::sleep(delay);
                    delay = (delay * 2).min(self.retry_cap);
                }
                Err(fault) => {
                    log::debug!("[{}] resume failed ({}), re-preparing", self.session_id, fault);
                    return self.rearm().map(|()| true);
                }
            }
        }

        match self.device.state() {
            PcmState::Running => Ok(true),
            PcmState::Prepared if self.endpoint.direction() == Direction::Playback => Ok(true),
            _ => self.rearm().map(|()| true),
        }
    }

    /// Drop the stream after a fatal fault and convert it for the caller.
    fn abort(&mut self, fault: LoopFault) -> TransferError {
        log::error!(
            "[{}] {} transfer failed in {:?}: {:?}",
            self.session_id,
            self.device.name(),
            self.state,
            fault
        );
        if let Err(f) = self.device.drop_stream() {
            log::warn!("[{}] drop after failure also failed: {}", self.session_id, f);
        }
        self.run.stop();
        fault.into()
    }

    fn release(&mut self, direction: Direction, outcome: TransferOutcome) {
        let result = if direction == Direction::Playback && outcome.is_complete() {
            self.device.drain()
        } else {
            self.device.drop_stream()
        };
        if let Err(f) = result {
            log::warn!("[{}] {} release failed: {}", self.session_id, self.device.name(), f);
        }
    }

    fn publish_progress(&self) {
        match &self.endpoint {
            Endpoint::Playback(cursor) => self.run.set_frames_played(cursor.completed()),
            Endpoint::Capture(target) => {
                self.run.set_frames_recorded(target.completed());
                if let Some(position) = target.ring_position() {
                    self.run.set_ring_position(position);
                }
            }
        }
    }

    fn set_state(&mut self, state: TransferState) {
        self.state = state;
        if let Some(ref d) = self.delegate {
            d.on_state_changed(&self.state);
        }
    }
}

/// Single-direction session over a poll-driven device.
///
/// Opening negotiates and prepares the device; [`run`](Self::run) blocks
/// the calling thread until the transfer ends; [`close`](Self::close)
/// hands the buffers back.
pub struct PollSession<D: PcmDevice> {
    id: Uuid,
    role: SessionRole,
    transfer: PollTransfer<D>,
    run: Arc<RunState>,
    outcome: Option<TransferOutcome>,
}

impl<D: PcmDevice> PollSession<D> {
    /// Play `buffer` from its first frame to its last.
    pub fn play(device: D, buffer: AppBuffer, config: &StreamConfig) -> Result<Self> {
        check_request(config, buffer.frames(), buffer.channels())?;
        let channels = buffer.channels();
        Self::open(SessionRole::Play, device, config, channels, |layout| {
            Endpoint::Playback(PlaybackCursor::new(buffer, layout))
        })
    }

    /// Record exactly `frames` frames of `channels` channels.
    pub fn record(device: D, frames: usize, channels: usize, config: &StreamConfig) -> Result<Self> {
        check_request(config, frames, channels)?;
        let buffer = AppBuffer::silent(frames, channels)?;
        Self::open(SessionRole::Record, device, config, channels, |layout| {
            Endpoint::Capture(CaptureTarget::Linear(LinearCapture::new(buffer, layout)))
        })
    }

    /// Record into a ring of `frames` frames until `config.trigger` fires
    /// and its post-trigger quota is met.
    pub fn record_triggered(device: D, frames: usize, channels: usize, config: &StreamConfig) -> Result<Self> {
        check_request(config, frames, channels)?;
        let trigger = config
            .trigger
            .as_ref()
            .ok_or_else(|| TransferError::invalid_config("triggered recording needs trigger settings"))?;
        let capture = TriggeredCapture::new(frames, channels, trigger, config.buffer_frames())?;
        Self::open(SessionRole::TriggeredRecord, device, config, channels, |_| {
            Endpoint::Capture(CaptureTarget::Triggered(capture))
        })
    }

    fn open(
        role: SessionRole,
        mut device: D,
        config: &StreamConfig,
        channels: usize,
        build: impl FnOnce(Layout) -> Endpoint,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let params = negotiate_device(&mut device, config, channels)?;
        device
            .prepare()
            .map_err(|f| TransferError::DeviceNotAvailable(format!("{}: {}", device.name(), f)))?;

        let run = RunState::new();
        run.start(params.sample_rate);
        let endpoint = build(params.layout);
        log::info!("[{}] {} session opened on {}", id, role, device.name());

        Ok(Self {
            id,
            role,
            transfer: PollTransfer::new(id, device, params, endpoint, run.clone(), config),
            run,
            outcome: None,
        })
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn TransferDelegate>) -> Self {
        self.transfer.set_delegate(Some(delegate));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Blocks until the transfer completes, is cancelled, or fails.
    pub fn run(&mut self) -> Result<TransferOutcome> {
        if self.outcome.is_some() {
            return Err(TransferError::Internal("session already ran".into()));
        }
        let outcome = self.transfer.run();
        self.outcome = Some(*outcome.as_ref().unwrap_or(&TransferOutcome::Failed));
        outcome
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

    pub fn frames_completed(&self) -> usize {
        self.transfer.frames_completed()
    }

    pub fn params(&self) -> &HwParams {
        self.transfer.params()
    }

    pub fn diagnostics(&self) -> &TransferDiagnostics {
        self.transfer.diagnostics()
    }

    pub fn device(&self) -> &D {
        self.transfer.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.transfer.device_mut()
    }

    /// Release the device and return the buffers.
    pub fn close(self) -> Result<TransferResult> {
        let Self {
            id,
            role,
            transfer,
            run,
            outcome,
            ..
        } = self;
        run.stop();

        let format = transfer.params().format;
        let diagnostics = transfer.diagnostics().clone();
        let outcome = outcome.unwrap_or(TransferOutcome::Cancelled);

        let mut result = TransferResult {
            session_id: id,
            role,
            outcome,
            format,
            frames_played: 0,
            frames_recorded: 0,
            playback: None,
            capture: None,
            trigger: None,
            diagnostics,
        };
        match transfer.into_endpoint() {
            Endpoint::Playback(cursor) => {
                result.frames_played = cursor.completed();
                result.playback = Some(cursor.into_buffer());
            }
            Endpoint::Capture(target) => {
                result.frames_recorded = target.completed();
                if let CaptureTarget::Triggered(ref triggered) = target {
                    result.trigger = triggered.report(id);
                }
                result.capture = Some(target.into_buffer()?);
            }
        }
        log::info!("[{}] {} session closed: {:?}", id, role, result.outcome);
        Ok(result)
    }
}

pub(crate) fn check_request(config: &StreamConfig, frames: usize, channels: usize) -> Result<()> {
    config.validate().map_err(TransferError::InvalidConfig)?;
    if frames == 0 {
        return Err(TransferError::invalid_config("transfer needs at least one frame"));
    }
    if channels == 0 {
        return Err(TransferError::invalid_config("transfer needs at least one channel"));
    }
    Ok(())
}
