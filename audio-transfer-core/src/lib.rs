//! # audio-transfer-core
//!
//! Platform-agnostic PCM transfer engine.
//!
//! Moves audio between caller-owned, channel-major `f64` buffers and an
//! audio device, in either of two driving models:
//!
//! - **Poll-driven**: a [`PollSession`] blocks a thread in a
//!   wait → query → copy → commit loop over a memory-mapped device ring,
//!   recovering from xruns, suspends and single short commits.
//! - **Callback-driven**: a [`CallbackSession`] registers a period handler
//!   with a runtime that calls it once per period on its real-time thread.
//!
//! Either model supports playback, fixed-length recording and triggered
//! recording into a ring that keeps pre-trigger audio. Duplex transfer is
//! [`PollDuplex`] (two devices, capture on a worker thread) or
//! [`CallbackSession::play_record`].
//!
//! Device backends implement [`PcmDevice`] or [`CallbackClient`]. The
//! `device::simulated` module provides in-memory implementations of both.
//!
//! ## Architecture
//!
//! ```text
//! audio-transfer-core (this crate)
//! ├── traits/       ← PcmDevice, CallbackClient, PeriodHandler, TransferDelegate
//! ├── models/       ← TransferError, DeviceFault, StreamConfig, TransferState, TransferResult
//! ├── processing/   ← SampleCodec, LayoutMapper, AppBuffer, TriggerDetector, RingCaptureBuffer
//! ├── session/      ← PollSession, PollDuplex, CallbackSession, RunState
//! └── device/       ← SimulatedPcm, SimulatedClient
//! ```

pub mod device;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use device::{FaultPoint, SimulatedClient, SimulatedPcm};
pub use models::audio_models::{
    Direction, HwParams, Layout, PeriodFormat, SampleFormat, SessionRole, TransferDiagnostics,
};
pub use models::config::{StreamConfig, TriggerConfig};
pub use models::error::{DeviceFault, Result, TransferError};
pub use models::recording_result::{TransferResult, TriggerReport};
pub use models::state::{TransferOutcome, TransferState, TriggerPhase};
pub use processing::buffer::AppBuffer;
pub use processing::codec::SampleCodec;
pub use processing::layout::{DeviceLayout, LayoutMapper, SampleView, SampleViewMut};
pub use processing::ring_capture::RingCaptureBuffer;
pub use processing::trigger::{TriggerDetector, TriggerEvent};
pub use session::callback::CallbackSession;
pub use session::poll_loop::{PollSession, PollTransfer};
pub use session::run_state::CancelHandle;
pub use session::worker::{PollDuplex, TransferWorker};
pub use traits::callback_client::{CallbackClient, Period, PeriodHandler};
pub use traits::pcm_device::{MappedRegion, PcmDevice, PcmState};
pub use traits::transfer_delegate::TransferDelegate;
