use std::sync::Arc;
use std::thread::{self, JoinHandle};

use uuid::Uuid;

use super::endpoint::{CaptureTarget, Endpoint, LinearCapture, PlaybackCursor};
use super::negotiate::negotiate_device;
use super::poll_loop::{check_request, PollTransfer};
use super::run_state::{CancelHandle, RunState};
use crate::models::audio_models::{SessionRole, TransferDiagnostics};
use crate::models::config::StreamConfig;
use crate::models::error::{Result, TransferError};
use crate::models::recording_result::TransferResult;
use crate::models::state::TransferOutcome;
use crate::processing::buffer::AppBuffer;
use crate::traits::pcm_device::PcmDevice;
use crate::traits::transfer_delegate::TransferDelegate;

type WorkerOutput<D> = (PollTransfer<D>, Result<TransferOutcome>);

/// A poll transfer running on its own named thread.
///
/// Joined exactly once: [`join`](Self::join) consumes the worker and hands
/// the transfer back with its result. Dropping an unjoined worker cancels
/// its session and waits for the thread.
pub struct TransferWorker<D: PcmDevice + 'static> {
    handle: Option<JoinHandle<WorkerOutput<D>>>,
    run: Arc<RunState>,
}

impl<D: PcmDevice + 'static> TransferWorker<D> {
    pub fn spawn(name: &str, run: Arc<RunState>, mut transfer: PollTransfer<D>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let result = transfer.run();
                (transfer, result)
            })
            .map_err(|e| TransferError::exhausted(format!("cannot spawn {} thread: {}", name, e)))?;
        Ok(Self {
            handle: Some(handle),
            run,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn join(mut self) -> Result<WorkerOutput<D>> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| TransferError::Internal("worker already joined".into()))?;
        handle
            .join()
            .map_err(|_| TransferError::Internal("transfer worker panicked".into()))
    }
}

impl<D: PcmDevice + 'static> Drop for TransferWorker<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.run.request_cancel();
            let _ = handle.join();
        }
    }
}

/// Simultaneous playback and capture over two poll-driven devices.
///
/// Capture runs on a worker thread and decides completion; playback runs
/// on the caller's thread and stops as soon as capture has finished, even
/// if frames remain.
pub struct PollDuplex<P: PcmDevice, C: PcmDevice + 'static> {
    id: Uuid,
    playback: PollTransfer<P>,
    capture: Option<PollTransfer<C>>,
    run: Arc<RunState>,
    outcome: Option<TransferOutcome>,
}

impl<P: PcmDevice, C: PcmDevice + 'static> PollDuplex<P, C> {
    pub fn new(
        mut playback_device: P,
        mut capture_device: C,
        buffer: AppBuffer,
        record_frames: usize,
        record_channels: usize,
        config: &StreamConfig,
    ) -> Result<Self> {
        check_request(config, buffer.frames(), buffer.channels())?;
        check_request(config, record_frames, record_channels)?;
        let capture_buffer = AppBuffer::silent(record_frames, record_channels)?;

        let play_params = negotiate_device(&mut playback_device, config, buffer.channels())?;
        let capture_params = negotiate_device(&mut capture_device, config, record_channels)?;
        if play_params.sample_rate != capture_params.sample_rate {
            return Err(TransferError::NegotiationFailed(format!(
                "playback runs at {} Hz, capture at {} Hz",
                play_params.sample_rate, capture_params.sample_rate
            )));
        }
        playback_device
            .prepare()
            .map_err(|f| TransferError::DeviceNotAvailable(format!("{}: {}", playback_device.name(), f)))?;
        capture_device
            .prepare()
            .map_err(|f| TransferError::DeviceNotAvailable(format!("{}: {}", capture_device.name(), f)))?;

        let id = Uuid::new_v4();
        let run = RunState::new();
        run.start(capture_params.sample_rate);

        let play_endpoint = Endpoint::Playback(PlaybackCursor::new(buffer, play_params.layout));
        let mut playback = PollTransfer::new(id, playback_device, play_params, play_endpoint, run.clone(), config);
        playback.follow_session();

        let capture_endpoint =
            Endpoint::Capture(CaptureTarget::Linear(LinearCapture::new(capture_buffer, capture_params.layout)));
        let capture = PollTransfer::new(id, capture_device, capture_params, capture_endpoint, run.clone(), config);

        log::info!(
            "[{}] {} session opened on {} + {}",
            id,
            SessionRole::PlayRecord,
            playback.device().name(),
            capture.device().name()
        );
        Ok(Self {
            id,
            playback,
            capture: Some(capture),
            run,
            outcome: None,
        })
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn TransferDelegate>) -> Self {
        self.playback.set_delegate(Some(delegate.clone()));
        if let Some(capture) = self.capture.as_mut() {
            capture.set_delegate(Some(delegate));
        }
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Blocks until capture completes, the session is cancelled, or either
    /// direction fails.
    pub fn run(&mut self) -> Result<TransferOutcome> {
        let capture = self
            .capture
            .take()
            .ok_or_else(|| TransferError::Internal("duplex session already ran".into()))?;
        let worker = TransferWorker::spawn("pcm-capture", self.run.clone(), capture)?;

        let played = self.playback.run();
        if played.is_err() {
            self.run.request_cancel();
        }
        let (capture, recorded) = worker.join()?;
        self.capture = Some(capture);

        let outcome = played.and(recorded);
        self.outcome = Some(*outcome.as_ref().unwrap_or(&TransferOutcome::Failed));
        outcome
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.run.clone())
    }

    pub fn finished(&self) -> bool {
        self.run.is_finished()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    pub fn frames_played(&self) -> usize {
        self.run.frames_played()
    }

    pub fn frames_recorded(&self) -> usize {
        self.run.frames_recorded()
    }

    pub fn playback_device(&self) -> &P {
        self.playback.device()
    }

    pub fn playback_device_mut(&mut self) -> &mut P {
        self.playback.device_mut()
    }

    /// `None` only while the capture half is running on its worker.
    pub fn capture_device(&self) -> Option<&C> {
        self.capture.as_ref().map(PollTransfer::device)
    }

    pub fn capture_device_mut(&mut self) -> Option<&mut C> {
        self.capture.as_mut().map(PollTransfer::device_mut)
    }

    pub fn close(self) -> Result<TransferResult> {
        let Self {
            id,
            playback,
            capture,
            run,
            outcome,
        } = self;
        run.stop();
        let capture = capture.ok_or_else(|| TransferError::Internal("capture transfer lost".into()))?;

        let format = capture.params().format;
        let mut diagnostics = TransferDiagnostics::default();
        for d in [playback.diagnostics(), capture.diagnostics()] {
            diagnostics.iterations += d.iterations;
            diagnostics.xruns_recovered += d.xruns_recovered;
            diagnostics.suspends_recovered += d.suspends_recovered;
            diagnostics.short_commits += d.short_commits;
        }

        let mut result = TransferResult {
            session_id: id,
            role: SessionRole::PlayRecord,
            outcome: outcome.unwrap_or(TransferOutcome::Cancelled),
            format,
            frames_played: playback.frames_completed(),
            frames_recorded: capture.frames_completed(),
            playback: None,
            capture: None,
            trigger: None,
            diagnostics,
        };
        if let Endpoint::Playback(cursor) = playback.into_endpoint() {
            result.playback = Some(cursor.into_buffer());
        }
        if let Endpoint::Capture(target) = capture.into_endpoint() {
            result.capture = Some(target.into_buffer()?);
        }
        log::info!("[{}] {} session closed: {:?}", id, SessionRole::PlayRecord, result.outcome);
        Ok(result)
    }
}
