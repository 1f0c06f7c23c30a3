//! # audio-transfer-cpal
//!
//! cpal backend for audio-transfer-core's callback sessions.
//!
//! Provides:
//! - `CpalClient` — a `CallbackClient` over cpal output and input streams
//! - `DeviceEnumerator` — device listing and lookup by name
//! - `PeriodDriver` — slices host buffers into handler periods (no hardware needed)
//!
//! The hardware-facing parts need the `hardware` feature, which pulls in
//! cpal and with it the platform audio libraries (ALSA headers on Linux).
//!
//! ## Usage
//! ```ignore
//! use audio_transfer_core::{AppBuffer, CallbackSession, StreamConfig};
//! use audio_transfer_cpal::CpalClient;
//!
//! let client = CpalClient::default_devices("tone")?;
//! let session = CallbackSession::play(client, buffer, &StreamConfig::default())?;
//! session.wait(std::time::Duration::from_secs(5));
//! let result = session.close()?;
//! ```

pub mod period_driver;

#[cfg(feature = "hardware")]
pub mod cpal_client;
#[cfg(feature = "hardware")]
pub mod device_enumerator;

#[cfg(feature = "hardware")]
pub use cpal_client::CpalClient;
#[cfg(feature = "hardware")]
pub use device_enumerator::{DeviceEnumerator, DeviceInfo};
pub use period_driver::{CaptureFeed, PeriodDriver, WireSample};
