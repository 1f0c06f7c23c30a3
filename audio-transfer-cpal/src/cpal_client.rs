//! [`CallbackClient`] over cpal streams.
//!
//! cpal streams cannot move between threads on every platform, so each
//! activation builds them on a dedicated `cpal-streams` thread that owns
//! them until deactivation. Callbacks reach the session's handler through
//! a shared slot they only ever `try_lock`.
//!
//! Stream topology per negotiated format:
//! ```text
//! playback only   output stream ──→ PeriodDriver::render
//! capture only    input stream  ──→ PeriodDriver::capture
//! duplex          input stream  ──→ CaptureFeed ──ring──→ PeriodDriver::render ←── output stream
//! ```

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SizedSample, Stream, SupportedStreamConfigRange};
use parking_lot::Mutex;

use audio_transfer_core::models::audio_models::{Direction, Layout, PeriodFormat, SampleFormat};
use audio_transfer_core::models::error::{DeviceFault, TransferError};
use audio_transfer_core::traits::callback_client::{CallbackClient, PeriodHandler};

use crate::device_enumerator::DeviceEnumerator;
use crate::period_driver::{HandlerSlot, PeriodDriver, WireSample};

/// Host sample format for a negotiated one.
pub fn cpal_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::Float32 => cpal::SampleFormat::F32,
        SampleFormat::Int32 => cpal::SampleFormat::I32,
        SampleFormat::Int16 => cpal::SampleFormat::I16,
    }
}

/// Pick a rate for `channels` of `format` from a device's supported ranges.
///
/// The requested rate wins when some matching range covers it; otherwise
/// the first matching range's nearest rate is used.
fn pick_rate(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    channels: usize,
    format: cpal::SampleFormat,
    rate: u32,
) -> Result<u32, DeviceFault> {
    let mut fallback = None;
    for range in ranges {
        if range.channels() as usize != channels || range.sample_format() != format {
            continue;
        }
        let (min, max) = (range.min_sample_rate().0, range.max_sample_rate().0);
        if (min..=max).contains(&rate) {
            return Ok(rate);
        }
        fallback.get_or_insert(rate.clamp(min, max));
    }
    fallback.ok_or_else(|| DeviceFault::Rejected(format!("{} channels of {:?} not supported", channels, format)))
}

fn stream_config(channels: usize, period: &PeriodFormat) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(period.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(period.period_frames as u32),
    }
}

fn stream_error(handler: HandlerSlot) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| match err {
        cpal::StreamError::DeviceNotAvailable => {
            log::error!("audio device went away, shutting the session down");
            if let Some(handler) = handler.lock().as_mut() {
                handler.shutdown();
            }
        }
        other => log::warn!("stream error: {}", other),
    }
}

fn open_streams(
    output: Option<&Device>,
    input: Option<&Device>,
    period: PeriodFormat,
    handler: &HandlerSlot,
) -> Result<Vec<Stream>, String> {
    match period.format {
        SampleFormat::Float32 => open_typed::<f32>(output, input, period, handler),
        SampleFormat::Int32 => open_typed::<i32>(output, input, period, handler),
        SampleFormat::Int16 => open_typed::<i16>(output, input, period, handler),
    }
}

fn open_typed<T: SizedSample + WireSample>(
    output: Option<&Device>,
    input: Option<&Device>,
    period: PeriodFormat,
    handler: &HandlerSlot,
) -> Result<Vec<Stream>, String> {
    let plays = period.playback_channels > 0;
    let records = period.capture_channels > 0;
    let mut streams = Vec::new();

    if plays && records {
        let (out_dev, in_dev) = output.zip(input).ok_or("duplex needs an output and an input device")?;
        let (mut driver, mut feed) = PeriodDriver::duplex(handler.clone(), period);
        let capture = in_dev
            .build_input_stream(
                &stream_config(period.capture_channels, &period),
                move |data: &[T], _: &cpal::InputCallbackInfo| feed.push(data),
                stream_error(handler.clone()),
                None,
            )
            .map_err(|e| format!("cannot build input stream: {}", e))?;
        let playback = out_dev
            .build_output_stream(
                &stream_config(period.playback_channels, &period),
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| driver.render(data),
                stream_error(handler.clone()),
                None,
            )
            .map_err(|e| format!("cannot build output stream: {}", e))?;
        streams.push(capture);
        streams.push(playback);
    } else if plays {
        let device = output.ok_or("no output device")?;
        let mut driver = PeriodDriver::new(handler.clone(), period);
        streams.push(
            device
                .build_output_stream(
                    &stream_config(period.playback_channels, &period),
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| driver.render(data),
                    stream_error(handler.clone()),
                    None,
                )
                .map_err(|e| format!("cannot build output stream: {}", e))?,
        );
    } else if records {
        let device = input.ok_or("no input device")?;
        let mut driver = PeriodDriver::new(handler.clone(), period);
        streams.push(
            device
                .build_input_stream(
                    &stream_config(period.capture_channels, &period),
                    move |data: &[T], _: &cpal::InputCallbackInfo| driver.capture(data),
                    stream_error(handler.clone()),
                    None,
                )
                .map_err(|e| format!("cannot build input stream: {}", e))?,
        );
    }

    // Capture starts first so the bridge has data by the first output period.
    for stream in &streams {
        stream.play().map_err(|e| format!("cannot start stream: {}", e))?;
    }
    Ok(streams)
}

/// Thread that owns the streams of one activation.
struct StreamWorker {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl StreamWorker {
    fn spawn(
        client: &str,
        output: Option<Device>,
        input: Option<Device>,
        period: PeriodFormat,
        handler: HandlerSlot,
    ) -> Result<Self, TransferError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let client = client.to_string();

        let handle = thread::Builder::new()
            .name("cpal-streams".into())
            .spawn(move || {
                let streams = match open_streams(output.as_ref(), input.as_ref(), period, &handler) {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                log::info!("{}: {} stream(s) running", client, streams.len());
                let _ = ready_tx.send(Ok(()));

                // A closed channel means the client is gone; stop either way.
                let _ = stop_rx.recv();
                drop(streams);
                log::info!("{}: streams stopped", client);
            })
            .map_err(|e| TransferError::exhausted(format!("failed to spawn stream thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop: stop_tx, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(TransferError::DeviceNotAvailable(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(TransferError::Internal("stream thread exited without reporting".into()))
            }
        }
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            log::error!("stream thread panicked");
        }
    }
}

/// A bound host device plus the name it reported.
struct Endpoint {
    device: Device,
    name: String,
}

impl Endpoint {
    fn new(device: Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "unknown".into());
        Self { device, name }
    }
}

/// Callback client driving an output device, an input device, or both.
///
/// Ports map one-to-one onto device channels: playback port `n` always
/// feeds output channel `n`. The only peer a port accepts is the physical
/// channel it is wired to, named `<device>:playback_<n+1>` or
/// `<device>:capture_<n+1>` (see [`peers`](Self::peers)).
pub struct CpalClient {
    name: String,
    output: Option<Endpoint>,
    input: Option<Endpoint>,
    period_frames: Option<usize>,
    format: Option<PeriodFormat>,
    playback_ports: Vec<String>,
    capture_ports: Vec<String>,
    connections: Vec<(Direction, usize, String)>,
    handler: HandlerSlot,
    worker: Option<StreamWorker>,
}

impl CpalClient {
    pub fn new(name: &str, output: Option<Device>, input: Option<Device>) -> Result<Self, TransferError> {
        if output.is_none() && input.is_none() {
            return Err(TransferError::DeviceNotAvailable("client needs at least one device".into()));
        }
        Ok(Self {
            name: name.into(),
            output: output.map(Endpoint::new),
            input: input.map(Endpoint::new),
            period_frames: None,
            format: None,
            playback_ports: Vec::new(),
            capture_ports: Vec::new(),
            connections: Vec::new(),
            handler: Arc::new(Mutex::new(None)),
            worker: None,
        })
    }

    /// Bind the host's default output and input devices, whichever exist.
    pub fn default_devices(name: &str) -> Result<Self, TransferError> {
        let devices = DeviceEnumerator::new();
        Self::new(
            name,
            devices.default_device(Direction::Playback).ok(),
            devices.default_device(Direction::Capture).ok(),
        )
    }

    /// Bind devices by host name.
    pub fn open(name: &str, output: Option<&str>, input: Option<&str>) -> Result<Self, TransferError> {
        let devices = DeviceEnumerator::new();
        let output = output.map(|n| devices.find(Direction::Playback, n)).transpose()?;
        let input = input.map(|n| devices.find(Direction::Capture, n)).transpose()?;
        Self::new(name, output, input)
    }

    /// Request a fixed host buffer size instead of the session's period.
    pub fn with_period_frames(mut self, frames: usize) -> Self {
        self.period_frames = Some(frames.max(1));
        self
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    pub fn format(&self) -> Option<&PeriodFormat> {
        self.format.as_ref()
    }

    /// Physical channel names ports of `direction` can connect to.
    pub fn peers(&self, direction: Direction) -> Vec<String> {
        let channels = match (direction, self.format) {
            (Direction::Playback, Some(f)) => f.playback_channels,
            (Direction::Capture, Some(f)) => f.capture_channels,
            (_, None) => 0,
        };
        (0..channels).filter_map(|ch| self.peer_name(direction, ch)).collect()
    }

    fn peer_name(&self, direction: Direction, channel: usize) -> Option<String> {
        match direction {
            Direction::Playback => self.output.as_ref().map(|e| format!("{}:playback_{}", e.name, channel + 1)),
            Direction::Capture => self.input.as_ref().map(|e| format!("{}:capture_{}", e.name, channel + 1)),
        }
    }

    fn endpoint(&self, direction: Direction) -> Result<&Endpoint, DeviceFault> {
        let endpoint = match direction {
            Direction::Playback => self.output.as_ref(),
            Direction::Capture => self.input.as_ref(),
        };
        endpoint.ok_or_else(|| DeviceFault::Other(format!("{} has no {:?} device", self.name, direction)))
    }
}

impl CallbackClient for CpalClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn negotiate(&mut self, request: &PeriodFormat) -> Result<PeriodFormat, DeviceFault> {
        if request.layout != Layout::Interleaved {
            return Err(DeviceFault::Rejected("host streams are interleaved only".into()));
        }
        let wanted = cpal_format(request.format);
        let mut rate = request.sample_rate;

        if request.playback_channels > 0 {
            let ranges = self
                .endpoint(Direction::Playback)?
                .device
                .supported_output_configs()
                .map_err(|e| DeviceFault::Other(format!("cannot query output configs: {}", e)))?;
            rate = pick_rate(ranges, request.playback_channels, wanted, rate)?;
        }
        if request.capture_channels > 0 {
            let ranges = self
                .endpoint(Direction::Capture)?
                .device
                .supported_input_configs()
                .map_err(|e| DeviceFault::Other(format!("cannot query input configs: {}", e)))?;
            let capture_rate = pick_rate(ranges, request.capture_channels, wanted, rate)?;
            if request.playback_channels > 0 && capture_rate != rate {
                return Err(DeviceFault::Rejected(format!(
                    "output runs at {} Hz, input only at {} Hz",
                    rate, capture_rate
                )));
            }
            rate = capture_rate;
        }

        let accepted = PeriodFormat {
            sample_rate: rate,
            period_frames: self.period_frames.unwrap_or(request.period_frames),
            ..*request
        };
        self.format = Some(accepted);
        self.playback_ports.clear();
        self.capture_ports.clear();
        log::debug!("{}: negotiated {:?}", self.name, accepted);
        Ok(accepted)
    }

    fn register_port(&mut self, direction: Direction, name: &str) -> Result<usize, TransferError> {
        let format = self
            .format
            .ok_or_else(|| TransferError::client("ports registered before negotiation"))?;
        let (ports, channels) = match direction {
            Direction::Playback => (&mut self.playback_ports, format.playback_channels),
            Direction::Capture => (&mut self.capture_ports, format.capture_channels),
        };
        if ports.len() >= channels {
            return Err(TransferError::client(format!(
                "{:?} stream has only {} channel(s)",
                direction, channels
            )));
        }
        ports.push(format!("{}:{}", self.name, name));
        Ok(ports.len() - 1)
    }

    fn connect(&mut self, direction: Direction, port: usize, peer: &str) -> Result<(), TransferError> {
        if !self.is_active() {
            return Err(TransferError::client("connect before activation"));
        }
        let registered = match direction {
            Direction::Playback => self.playback_ports.len(),
            Direction::Capture => self.capture_ports.len(),
        };
        if port >= registered {
            return Err(TransferError::client(format!("no {:?} port {}", direction, port)));
        }
        let wired = self.peer_name(direction, port);
        if wired.as_deref() != Some(peer) {
            return Err(TransferError::client(format!(
                "{:?} port {} is wired to {} only, not {}",
                direction,
                port,
                wired.unwrap_or_default(),
                peer
            )));
        }
        self.connections.push((direction, port, peer.to_string()));
        Ok(())
    }

    fn disconnect(&mut self, direction: Direction, port: usize, peer: &str) -> Result<(), TransferError> {
        let before = self.connections.len();
        self.connections
            .retain(|(d, p, name)| !(*d == direction && *p == port && name == peer));
        if self.connections.len() == before {
            return Err(TransferError::client(format!(
                "{:?} port {} not connected to {}",
                direction, port, peer
            )));
        }
        Ok(())
    }

    fn activate(&mut self, handler: Box<dyn PeriodHandler>) -> Result<(), TransferError> {
        if self.worker.is_some() {
            return Err(TransferError::client("client already active"));
        }
        let format = self
            .format
            .ok_or_else(|| TransferError::client("activate before negotiation"))?;
        *self.handler.lock() = Some(handler);

        let output = self.output.as_ref().map(|e| e.device.clone());
        let input = self.input.as_ref().map(|e| e.device.clone());
        match StreamWorker::spawn(&self.name, output, input, format, self.handler.clone()) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.handler.lock().take();
                Err(e)
            }
        }
    }

    fn deactivate(&mut self) -> Result<Box<dyn PeriodHandler>, TransferError> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| TransferError::client("client not active"))?;
        worker.stop();
        self.connections.clear();
        self.handler
            .lock()
            .take()
            .ok_or_else(|| TransferError::Internal("handler slot emptied while active".into()))
    }
}

impl Drop for CpalClient {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use cpal::{SampleRate, SupportedBufferSize};

    use super::*;

    fn range(channels: u16, min: u32, max: u32, format: cpal::SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn formats_map_onto_host_formats() {
        assert_eq!(cpal_format(SampleFormat::Float32), cpal::SampleFormat::F32);
        assert_eq!(cpal_format(SampleFormat::Int32), cpal::SampleFormat::I32);
        assert_eq!(cpal_format(SampleFormat::Int16), cpal::SampleFormat::I16);
    }

    #[test]
    fn requested_rate_is_kept_when_covered() {
        let ranges = vec![
            range(2, 44100, 44100, cpal::SampleFormat::F32),
            range(2, 8000, 96000, cpal::SampleFormat::F32),
        ];
        assert_eq!(pick_rate(ranges.into_iter(), 2, cpal::SampleFormat::F32, 48000), Ok(48000));
    }

    #[test]
    fn uncovered_rate_falls_back_to_nearest() {
        let ranges = vec![range(1, 8000, 16000, cpal::SampleFormat::I16)];
        assert_eq!(pick_rate(ranges.into_iter(), 1, cpal::SampleFormat::I16, 48000), Ok(16000));
    }

    #[test]
    fn mismatched_ranges_are_rejected() {
        let ranges = vec![
            range(2, 8000, 96000, cpal::SampleFormat::I16),
            range(1, 8000, 96000, cpal::SampleFormat::F32),
        ];
        let err = pick_rate(ranges.into_iter(), 2, cpal::SampleFormat::F32, 48000).unwrap_err();
        assert!(matches!(err, DeviceFault::Rejected(_)));
    }
}
