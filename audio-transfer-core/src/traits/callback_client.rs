use std::any::Any;

use crate::models::audio_models::{Direction, PeriodFormat};
use crate::models::error::{DeviceFault, TransferError};
use crate::processing::layout::{SampleView, SampleViewMut};

/// Buffers for one period, valid only for the duration of the call.
///
/// `frames` is the number of frames in this period; each view's regions
/// are `frames` long.
#[derive(Debug)]
pub struct Period<'a> {
    pub frames: usize,
    pub input: Option<SampleView<'a>>,
    pub output: Option<SampleViewMut<'a>>,
}

/// Per-period processor registered with a callback client.
///
/// `process` runs on the runtime's real-time thread: it must not block,
/// allocate or log.
pub trait PeriodHandler: Send + 'static {
    fn process(&mut self, period: &mut Period<'_>);

    /// The runtime changed its sample rate.
    fn sample_rate_changed(&mut self, _sample_rate: u32) {}

    /// The runtime shut the client down; no further periods will arrive.
    fn shutdown(&mut self) {}

    /// Recover the concrete handler after deactivation.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// Callback-driven audio runtime client.
///
/// Equivalent to a JACK client. Implemented by:
/// - `SimulatedClient` (in-process scheduler, used by tests)
/// - `CpalClient` in the `audio-transfer-cpal` crate
pub trait CallbackClient: Send {
    fn name(&self) -> &str;

    /// Agree on the per-period buffer format. `DeviceFault::Rejected`
    /// lets the session fall back to another format or layout.
    fn negotiate(&mut self, request: &PeriodFormat) -> Result<PeriodFormat, DeviceFault>;

    /// Register a named port and return its index within `direction`.
    fn register_port(&mut self, direction: Direction, name: &str) -> Result<usize, TransferError>;

    fn connect(&mut self, direction: Direction, port: usize, peer: &str) -> Result<(), TransferError>;

    fn disconnect(&mut self, direction: Direction, port: usize, peer: &str) -> Result<(), TransferError>;

    /// Start invoking `handler` once per period.
    fn activate(&mut self, handler: Box<dyn PeriodHandler>) -> Result<(), TransferError>;

    /// Stop invoking the handler and hand it back.
    fn deactivate(&mut self) -> Result<Box<dyn PeriodHandler>, TransferError>;
}
