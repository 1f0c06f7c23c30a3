//! Audio device enumeration through the cpal host API.
//!
//! Lists output (playback) and input (capture) devices with their default
//! stream parameters, and resolves devices by name for [`CpalClient`].
//!
//! [`CpalClient`]: crate::CpalClient

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

use audio_transfer_core::models::audio_models::Direction;
use audio_transfer_core::models::error::TransferError;

/// One device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
    pub channels: usize,
    pub sample_rate: u32,
}

/// Device enumerator over the default cpal host.
pub struct DeviceEnumerator {
    host: Host,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// List output devices.
    pub fn list_playback_devices(&self) -> Result<Vec<DeviceInfo>, TransferError> {
        self.list_devices(Direction::Playback)
    }

    /// List input devices.
    pub fn list_capture_devices(&self) -> Result<Vec<DeviceInfo>, TransferError> {
        self.list_devices(Direction::Capture)
    }

    pub fn default_device(&self, direction: Direction) -> Result<Device, TransferError> {
        let device = match direction {
            Direction::Playback => self.host.default_output_device(),
            Direction::Capture => self.host.default_input_device(),
        };
        device.ok_or_else(|| TransferError::DeviceNotAvailable(format!("no default {:?} device", direction)))
    }

    /// Find a device by its exact host name.
    pub fn find(&self, direction: Direction, name: &str) -> Result<Device, TransferError> {
        let mut devices = self.devices(direction)?;
        devices
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| TransferError::DeviceNotAvailable(format!("no {:?} device named {}", direction, name)))
    }

    fn devices(&self, direction: Direction) -> Result<Box<dyn Iterator<Item = Device>>, TransferError> {
        let devices: Box<dyn Iterator<Item = Device>> = match direction {
            Direction::Playback => Box::new(
                self.host
                    .output_devices()
                    .map_err(|e| TransferError::DeviceNotAvailable(format!("cannot list output devices: {}", e)))?,
            ),
            Direction::Capture => Box::new(
                self.host
                    .input_devices()
                    .map_err(|e| TransferError::DeviceNotAvailable(format!("cannot list input devices: {}", e)))?,
            ),
        };
        Ok(devices)
    }

    fn list_devices(&self, direction: Direction) -> Result<Vec<DeviceInfo>, TransferError> {
        let default_name = self.default_device(direction).ok().and_then(|d| d.name().ok());

        let mut infos = Vec::new();
        for (i, device) in self.devices(direction)?.enumerate() {
            let name = device.name().unwrap_or_else(|_| format!("Device {}", i));
            let config = match direction {
                Direction::Playback => device.default_output_config(),
                Direction::Capture => device.default_input_config(),
            };
            let Ok(config) = config else {
                log::debug!("skipping {} without a default {:?} config", name, direction);
                continue;
            };
            infos.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                direction,
                channels: config.channels() as usize,
                sample_rate: config.sample_rate().0,
            });
        }
        Ok(infos)
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}
