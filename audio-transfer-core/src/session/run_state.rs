use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Flags and counters shared between a session, its transfer loop or
/// period handler, and any thread holding a [`CancelHandle`].
///
/// Every field is a lock-free atomic so the real-time side can read and
/// update it without blocking. Counters use relaxed ordering; the
/// `finished` flag is released by the writer and acquired by observers so
/// that buffer contents are visible once completion is seen.
#[derive(Debug, Default)]
pub struct RunState {
    running: AtomicBool,
    cancel_requested: AtomicBool,
    finished: AtomicBool,
    shutdown: AtomicBool,
    frames_played: AtomicUsize,
    frames_recorded: AtomicUsize,
    got_trigger: AtomicBool,
    trigger_frame: AtomicU64,
    ring_position: AtomicUsize,
    sample_rate: AtomicU32,
}

impl RunState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arm for a new run, clearing every flag and counter.
    pub fn start(&self, sample_rate: u32) {
        self.cancel_requested.store(false, Ordering::Relaxed);
        self.finished.store(false, Ordering::Relaxed);
        self.shutdown.store(false, Ordering::Relaxed);
        self.frames_played.store(0, Ordering::Relaxed);
        self.frames_recorded.store(0, Ordering::Relaxed);
        self.got_trigger.store(false, Ordering::Relaxed);
        self.trigger_frame.store(0, Ordering::Relaxed);
        self.ring_position.store(0, Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
    }

    /// True while the transfer is active and no cancel has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.cancel_requested.load(Ordering::Acquire)
    }

    /// True while the transfer may still move frames.
    pub fn should_advance(&self) -> bool {
        self.is_running() && !self.finished.load(Ordering::Acquire)
    }

    /// Ask the transfer to stop at its next check. Safe from any thread
    /// and from signal-style contexts: it is a single atomic store.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Mark the run as completed.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    /// Mark the run as stopped without completion.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// The callback runtime went away.
    pub fn mark_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn set_frames_played(&self, frames: usize) {
        self.frames_played.store(frames, Ordering::Relaxed);
    }

    pub fn frames_played(&self) -> usize {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn set_frames_recorded(&self, frames: usize) {
        self.frames_recorded.store(frames, Ordering::Relaxed);
    }

    pub fn frames_recorded(&self) -> usize {
        self.frames_recorded.load(Ordering::Relaxed)
    }

    pub fn mark_triggered(&self, frame: u64) {
        self.trigger_frame.store(frame, Ordering::Relaxed);
        self.got_trigger.store(true, Ordering::Release);
    }

    pub fn got_trigger(&self) -> bool {
        self.got_trigger.load(Ordering::Acquire)
    }

    pub fn trigger_frame(&self) -> Option<u64> {
        self.got_trigger().then(|| self.trigger_frame.load(Ordering::Relaxed))
    }

    pub fn set_ring_position(&self, position: usize) {
        self.ring_position.store(position, Ordering::Relaxed);
    }

    pub fn ring_position(&self) -> usize {
        self.ring_position.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }
}

/// Cloneable handle for cancelling a session from another thread or a
/// signal handler.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    run: Arc<RunState>,
}

impl CancelHandle {
    pub(crate) fn new(run: Arc<RunState>) -> Self {
        Self { run }
    }

    pub fn request_cancel(&self) {
        self.run.request_cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancel_requested()
    }

    /// Whether the session is still transferring.
    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }
}
