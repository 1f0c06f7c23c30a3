use crate::models::audio_models::{Direction, HwParams};
use crate::models::error::DeviceFault;
use crate::processing::layout::SampleViewMut;

/// Hardware state as reported by a poll-driven device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
    Suspended,
}

/// A contiguous, directly addressable part of the device ring.
///
/// `view` spans the whole ring (every region for planar layout); the loop
/// may touch frames `[offset, offset + frames)` only.
#[derive(Debug)]
pub struct MappedRegion<'a> {
    pub view: SampleViewMut<'a>,
    pub offset: usize,
    pub frames: usize,
}

/// Poll-driven PCM device with a memory-mapped ring buffer.
///
/// Equivalent to an ALSA `mmap` stream. Implemented by:
/// - `SimulatedPcm` (in-memory ring, used by tests)
/// - Platform backends wrapping a kernel PCM handle
///
/// Every call reports failure as a [`DeviceFault`]; the transfer loop
/// decides whether the fault is recoverable.
pub trait PcmDevice: Send {
    /// Identifier used in log lines.
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// Apply hardware parameters.
    ///
    /// Returns the accepted parameters, which may differ in rate, period or
    /// buffer size. Returns `DeviceFault::Rejected` when the format or
    /// layout is not supported so negotiation can fall back.
    fn configure(&mut self, request: &HwParams) -> Result<HwParams, DeviceFault>;

    /// Re-arm the stream for a fresh run, discarding ring contents.
    fn prepare(&mut self) -> Result<(), DeviceFault>;

    fn start(&mut self) -> Result<(), DeviceFault>;

    fn state(&self) -> PcmState;

    /// Block until the device can accept (playback) or deliver (capture)
    /// data, or until a fault occurs.
    fn wait_ready(&mut self) -> Result<(), DeviceFault>;

    /// Frames currently writable (playback) or readable (capture).
    fn avail(&mut self) -> Result<usize, DeviceFault>;

    /// Map up to `frames` contiguous frames at the application pointer.
    fn map(&mut self, frames: usize) -> Result<MappedRegion<'_>, DeviceFault>;

    /// Hand `frames` frames at `offset` to the device. Returns how many the
    /// device actually accepted.
    fn commit(&mut self, offset: usize, frames: usize) -> Result<usize, DeviceFault>;

    /// Try to leave the suspended state. `DeviceFault::WouldBlock` means
    /// the hardware is not ready yet.
    fn resume(&mut self) -> Result<(), DeviceFault>;

    /// Play out pending frames and stop.
    fn drain(&mut self) -> Result<(), DeviceFault>;

    /// Stop immediately, discarding pending frames.
    fn drop_stream(&mut self) -> Result<(), DeviceFault>;
}
