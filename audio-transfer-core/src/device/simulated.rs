use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{Direction, HwParams, Layout, PeriodFormat, SampleFormat};
use crate::models::error::{DeviceFault, Result, TransferError};
use crate::processing::buffer::AppBuffer;
use crate::processing::codec::SampleCodec;
use crate::processing::layout::{DeviceLayout, SampleView, SampleViewMut};
use crate::traits::callback_client::{CallbackClient, Period, PeriodHandler};
use crate::traits::pcm_device::{MappedRegion, PcmDevice, PcmState};

/// Device call at which a scripted fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    WaitReady,
    Avail,
    Map,
    Commit,
}

#[derive(Debug, Clone, PartialEq)]
enum Injection {
    Fault(DeviceFault),
    ShortCommit { accept: usize },
}

#[derive(Debug, Clone)]
struct Scripted {
    point: FaultPoint,
    call: usize,
    injection: Injection,
}

type CommitHook = Box<dyn FnMut(usize) + Send>;

/// In-memory poll-driven PCM device with an mmap-style ring.
///
/// The hardware pointer only moves inside `wait_ready`: playback consumes
/// every committed frame into [`played`](Self::played), capture fills all
/// free space from the source signal (silence once it runs out). Faults
/// are injected by call index per [`FaultPoint`], counted from zero.
pub struct SimulatedPcm {
    name: String,
    direction: Direction,
    formats: Vec<SampleFormat>,
    layouts: Vec<Layout>,
    forced_buffer: Option<usize>,
    max_chunk: usize,
    params: Option<HwParams>,
    area: Vec<u8>,
    state: PcmState,
    suspended_from: PcmState,
    appl_ptr: usize,
    hw_ptr: usize,
    source: Option<AppBuffer>,
    source_pos: usize,
    played: Vec<Vec<f64>>,
    script: Vec<Scripted>,
    calls: HashMap<FaultPoint, usize>,
    resume_busy: usize,
    commits: Vec<usize>,
    committed: usize,
    hook: Option<CommitHook>,
}

impl SimulatedPcm {
    fn new(name: &str, direction: Direction, source: Option<AppBuffer>) -> Self {
        Self {
            name: name.into(),
            direction,
            formats: vec![SampleFormat::Float32, SampleFormat::Int32, SampleFormat::Int16],
            layouts: vec![Layout::Interleaved, Layout::Planar],
            forced_buffer: None,
            max_chunk: usize::MAX,
            params: None,
            area: Vec::new(),
            state: PcmState::Open,
            suspended_from: PcmState::Open,
            appl_ptr: 0,
            hw_ptr: 0,
            source,
            source_pos: 0,
            played: Vec::new(),
            script: Vec::new(),
            calls: HashMap::new(),
            resume_busy: 0,
            commits: Vec::new(),
            committed: 0,
            hook: None,
        }
    }

    pub fn playback(name: &str) -> Self {
        Self::new(name, Direction::Playback, None)
    }

    /// Capture device replaying `source`, then silence.
    pub fn capture(name: &str, source: AppBuffer) -> Self {
        Self::new(name, Direction::Capture, Some(source))
    }

    /// Restrict the sample formats the device accepts.
    pub fn with_formats(mut self, formats: &[SampleFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Restrict the layouts the device accepts.
    pub fn with_layouts(mut self, layouts: &[Layout]) -> Self {
        self.layouts = layouts.to_vec();
        self
    }

    /// Cap the contiguous span a single `map` returns.
    pub fn with_max_chunk(mut self, frames: usize) -> Self {
        self.max_chunk = frames.max(1);
        self
    }

    /// Override the ring size chosen at configure time.
    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.forced_buffer = Some(frames.max(1));
        self
    }

    /// Fail call number `call` at `point` with `fault`.
    pub fn inject(mut self, point: FaultPoint, call: usize, fault: DeviceFault) -> Self {
        self.script.push(Scripted {
            point,
            call,
            injection: Injection::Fault(fault),
        });
        self
    }

    /// Make commit number `call` accept only `accept` frames.
    pub fn inject_short_commit(mut self, call: usize, accept: usize) -> Self {
        self.script.push(Scripted {
            point: FaultPoint::Commit,
            call,
            injection: Injection::ShortCommit { accept },
        });
        self
    }

    /// Number of resume attempts answered with `WouldBlock` before the
    /// device comes back.
    pub fn with_resume_busy(mut self, attempts: usize) -> Self {
        self.resume_busy = attempts;
        self
    }

    /// Called after every commit with the running total of accepted frames.
    pub fn on_commit(&mut self, hook: impl FnMut(usize) + Send + 'static) {
        self.hook = Some(Box::new(hook));
    }

    pub fn params(&self) -> Option<&HwParams> {
        self.params.as_ref()
    }

    /// Accepted frames per commit, in order.
    pub fn commits(&self) -> &[usize] {
        &self.commits
    }

    pub fn committed_frames(&self) -> usize {
        self.committed
    }

    pub fn calls(&self, point: FaultPoint) -> usize {
        self.calls.get(&point).copied().unwrap_or(0)
    }

    /// Everything the hardware has played, decoded, channel-major.
    pub fn played(&self) -> Result<AppBuffer> {
        AppBuffer::from_channels(&self.played)
    }

    fn buffer_frames(&self) -> std::result::Result<usize, DeviceFault> {
        self.params
            .map(|p| p.buffer_frames)
            .ok_or_else(|| DeviceFault::Other("device not configured".into()))
    }

    fn pending(&self) -> usize {
        match self.direction {
            Direction::Playback => self.appl_ptr - self.hw_ptr,
            Direction::Capture => self.hw_ptr - self.appl_ptr,
        }
    }

    fn current_avail(&self, buffer: usize) -> usize {
        match self.direction {
            Direction::Playback => buffer - self.pending(),
            Direction::Capture => self.pending(),
        }
    }

    fn scripted(&mut self, point: FaultPoint) -> std::result::Result<Option<usize>, DeviceFault> {
        let counter = self.calls.entry(point).or_insert(0);
        let call = *counter;
        *counter += 1;

        let Some(idx) = self.script.iter().position(|s| s.point == point && s.call == call) else {
            return Ok(None);
        };
        match self.script.remove(idx).injection {
            Injection::ShortCommit { accept } => Ok(Some(accept)),
            Injection::Fault(fault) => {
                match fault {
                    DeviceFault::Xrun => self.state = PcmState::Xrun,
                    DeviceFault::Suspended => {
                        self.suspended_from = self.state;
                        self.state = PcmState::Suspended;
                    }
                    _ => {}
                }
                Err(fault)
            }
        }
    }

    fn check_state(&self) -> std::result::Result<(), DeviceFault> {
        match self.state {
            PcmState::Xrun => Err(DeviceFault::Xrun),
            PcmState::Suspended => Err(DeviceFault::Suspended),
            PcmState::Prepared | PcmState::Running => Ok(()),
            other => Err(DeviceFault::Other(format!("device is {:?}", other))),
        }
    }

    /// Move the hardware pointer as far as it can go.
    fn advance_hardware(&mut self) {
        let Some(params) = self.params else {
            return;
        };
        let buffer = params.buffer_frames;
        let codec = SampleCodec::new(params.format);
        let device = DeviceLayout::new(params.layout, params.channels);

        match self.direction {
            Direction::Playback => {
                let Ok(view) = SampleView::new(&self.area, device, buffer, codec.sample_size()) else {
                    return;
                };
                for frame in self.hw_ptr..self.appl_ptr {
                    for (c, channel) in self.played.iter_mut().enumerate() {
                        channel.push(view.read(&codec, frame % buffer, c));
                    }
                }
                self.hw_ptr = self.appl_ptr;
            }
            Direction::Capture => {
                let space = buffer - (self.hw_ptr - self.appl_ptr);
                let Ok(mut view) = SampleViewMut::new(&mut self.area, device, buffer, codec.sample_size()) else {
                    return;
                };
                for i in 0..space {
                    let offset = (self.hw_ptr + i) % buffer;
                    for c in 0..params.channels {
                        let sample = match &self.source {
                            Some(src) if c < src.channels() && self.source_pos < src.frames() => {
                                src.get(self.source_pos, c)
                            }
                            _ => 0.0,
                        };
                        view.write(&codec, offset, c, sample);
                    }
                    self.source_pos += 1;
                }
                self.hw_ptr += space;
            }
        }
    }
}

impl PcmDevice for SimulatedPcm {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn configure(&mut self, request: &HwParams) -> std::result::Result<HwParams, DeviceFault> {
        if !self.formats.contains(&request.format) {
            return Err(DeviceFault::Rejected(format!("format {} not supported", request.format)));
        }
        if !self.layouts.contains(&request.layout) {
            return Err(DeviceFault::Rejected(format!("{:?} access not supported", request.layout)));
        }
        let buffer_frames = self.forced_buffer.unwrap_or(request.buffer_frames).max(1);
        let accepted = HwParams {
            buffer_frames,
            period_frames: request.period_frames.min(buffer_frames),
            ..*request
        };

        self.area = vec![0; buffer_frames * accepted.channels * accepted.format.sample_size()];
        self.played = vec![Vec::new(); accepted.channels];
        self.appl_ptr = 0;
        self.hw_ptr = 0;
        self.state = PcmState::Setup;
        self.params = Some(accepted);
        Ok(accepted)
    }

    fn prepare(&mut self) -> std::result::Result<(), DeviceFault> {
        self.buffer_frames()?;
        self.hw_ptr = self.appl_ptr;
        self.state = PcmState::Prepared;
        Ok(())
    }

    fn start(&mut self) -> std::result::Result<(), DeviceFault> {
        if self.state != PcmState::Prepared {
            return Err(DeviceFault::Other(format!("start while {:?}", self.state)));
        }
        self.state = PcmState::Running;
        Ok(())
    }

    fn state(&self) -> PcmState {
        self.state
    }

    fn wait_ready(&mut self) -> std::result::Result<(), DeviceFault> {
        self.scripted(FaultPoint::WaitReady)?;
        self.check_state()?;
        let buffer = self.buffer_frames()?;
        match (self.state, self.direction) {
            (PcmState::Running, _) => {
                self.advance_hardware();
                Ok(())
            }
            (_, Direction::Capture) => Err(DeviceFault::Other("capture waited before start".into())),
            (_, Direction::Playback) if self.current_avail(buffer) == 0 => {
                Err(DeviceFault::Other("ring full but playback never started".into()))
            }
            _ => Ok(()),
        }
    }

    fn avail(&mut self) -> std::result::Result<usize, DeviceFault> {
        self.scripted(FaultPoint::Avail)?;
        self.check_state()?;
        let buffer = self.buffer_frames()?;
        Ok(self.current_avail(buffer))
    }

    fn map(&mut self, frames: usize) -> std::result::Result<MappedRegion<'_>, DeviceFault> {
        self.scripted(FaultPoint::Map)?;
        self.check_state()?;
        let params = self
            .params
            .ok_or_else(|| DeviceFault::Other("device not configured".into()))?;
        let buffer = params.buffer_frames;
        let offset = self.appl_ptr % buffer;
        let frames = frames
            .min(self.current_avail(buffer))
            .min(buffer - offset)
            .min(self.max_chunk);

        let device = DeviceLayout::new(params.layout, params.channels);
        let view = SampleViewMut::new(&mut self.area, device, buffer, params.format.sample_size())
            .map_err(|e| DeviceFault::Other(e.to_string()))?;
        Ok(MappedRegion { view, offset, frames })
    }

    fn commit(&mut self, offset: usize, frames: usize) -> std::result::Result<usize, DeviceFault> {
        let short = self.scripted(FaultPoint::Commit)?;
        self.check_state()?;
        let buffer = self.buffer_frames()?;
        if offset != self.appl_ptr % buffer {
            return Err(DeviceFault::Other(format!(
                "commit at {} but application pointer is at {}",
                offset,
                self.appl_ptr % buffer
            )));
        }
        let accepted = short.map_or(frames, |accept| accept.min(frames));
        self.appl_ptr += accepted;
        self.committed += accepted;
        self.commits.push(accepted);
        if let Some(hook) = self.hook.as_mut() {
            hook(self.committed);
        }
        Ok(accepted)
    }

    fn resume(&mut self) -> std::result::Result<(), DeviceFault> {
        if self.state != PcmState::Suspended {
            return Err(DeviceFault::Other(format!("resume while {:?}", self.state)));
        }
        if self.resume_busy > 0 {
            self.resume_busy -= 1;
            return Err(DeviceFault::WouldBlock);
        }
        self.state = self.suspended_from;
        Ok(())
    }

    fn drain(&mut self) -> std::result::Result<(), DeviceFault> {
        if matches!(self.state, PcmState::Running | PcmState::Prepared) && self.direction == Direction::Playback {
            self.advance_hardware();
        }
        self.state = PcmState::Setup;
        Ok(())
    }

    fn drop_stream(&mut self) -> std::result::Result<(), DeviceFault> {
        self.state = PcmState::Setup;
        Ok(())
    }
}

struct ClientCore {
    formats: Vec<SampleFormat>,
    layouts: Vec<Layout>,
    sample_rate: u32,
    period_frames: usize,
    format: Option<PeriodFormat>,
    playback_ports: Vec<String>,
    capture_ports: Vec<String>,
    peers: Option<Vec<String>>,
    connections: Vec<(Direction, usize, String)>,
    input: Option<AppBuffer>,
    input_pos: usize,
    in_bytes: Vec<u8>,
    out_bytes: Vec<u8>,
    played: Vec<Vec<f64>>,
    periods_run: u64,
    auto_clock: Option<Duration>,
}

impl ClientCore {
    fn fill_input(&mut self, format: &PeriodFormat) {
        if format.capture_channels == 0 {
            return;
        }
        let codec = SampleCodec::new(format.format);
        let device = DeviceLayout::new(format.layout, format.capture_channels);
        let Ok(mut view) = SampleViewMut::new(&mut self.in_bytes, device, format.period_frames, codec.sample_size())
        else {
            return;
        };
        for f in 0..format.period_frames {
            let pos = self.input_pos + f;
            for c in 0..format.capture_channels {
                let sample = match &self.input {
                    Some(src) if c < src.channels() && pos < src.frames() => src.get(pos, c),
                    _ => 0.0,
                };
                view.write(&codec, f, c, sample);
            }
        }
        self.input_pos += format.period_frames;
    }

    fn collect_output(&mut self, format: &PeriodFormat) {
        if format.playback_channels == 0 {
            return;
        }
        let codec = SampleCodec::new(format.format);
        let device = DeviceLayout::new(format.layout, format.playback_channels);
        let Ok(view) = SampleView::new(&self.out_bytes, device, format.period_frames, codec.sample_size()) else {
            return;
        };
        for f in 0..format.period_frames {
            for (c, channel) in self.played.iter_mut().enumerate() {
                channel.push(view.read(&codec, f, c));
            }
        }
    }
}

struct Shared {
    core: Mutex<ClientCore>,
    handler: Mutex<Option<Box<dyn PeriodHandler>>>,
    clocking: AtomicBool,
}

/// In-process callback runtime.
///
/// Periods run either synchronously through [`run_period`](Self::run_period)
/// or on a clock thread started with [`start_clock`](Self::start_clock).
/// Clones share the same runtime, so a test can keep one handle while a
/// session owns another. Output periods are pre-filled with `0xAA` so a
/// handler that fails to write every byte is caught.
#[derive(Clone)]
pub struct SimulatedClient {
    name: String,
    shared: Arc<Shared>,
    clock: Arc<Mutex<Option<JoinHandle<()>>>>,
}

const UNWRITTEN: u8 = 0xAA;

impl SimulatedClient {
    pub fn new(name: &str, sample_rate: u32, period_frames: usize) -> Self {
        let core = ClientCore {
            formats: vec![SampleFormat::Float32],
            layouts: vec![Layout::Planar],
            sample_rate,
            period_frames: period_frames.max(1),
            format: None,
            playback_ports: Vec::new(),
            capture_ports: Vec::new(),
            peers: None,
            connections: Vec::new(),
            input: None,
            input_pos: 0,
            in_bytes: Vec::new(),
            out_bytes: Vec::new(),
            played: Vec::new(),
            periods_run: 0,
            auto_clock: None,
        };
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                handler: Mutex::new(None),
                clocking: AtomicBool::new(false),
            }),
            clock: Arc::new(Mutex::new(None)),
        }
    }

    /// Accepted formats; defaults to planar Float32 only.
    pub fn with_formats(self, formats: &[SampleFormat]) -> Self {
        self.shared.core.lock().formats = formats.to_vec();
        self
    }

    pub fn with_layouts(self, layouts: &[Layout]) -> Self {
        self.shared.core.lock().layouts = layouts.to_vec();
        self
    }

    /// Signal delivered on capture ports, then silence.
    pub fn with_input(self, input: AppBuffer) -> Self {
        self.shared.core.lock().input = Some(input);
        self
    }

    /// Restrict the peers ports may connect to.
    pub fn with_peers(self, peers: &[&str]) -> Self {
        self.shared.core.lock().peers = Some(peers.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Start the clock automatically on activation.
    pub fn with_clock(self, interval: Duration) -> Self {
        self.shared.core.lock().auto_clock = Some(interval);
        self
    }

    /// Run one period on the calling thread. Returns false when no handler
    /// is active or the handler is busy on another thread.
    pub fn run_period(&self) -> bool {
        let Some(mut slot) = self.shared.handler.try_lock() else {
            return false;
        };
        let Some(handler) = slot.as_mut() else {
            return false;
        };
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        let Some(format) = core.format else {
            return false;
        };

        core.fill_input(&format);
        core.out_bytes.fill(UNWRITTEN);
        {
            let ss = format.format.sample_size();
            let ClientCore { in_bytes, out_bytes, .. } = &mut *core;
            let input = if format.capture_channels > 0 {
                let device = DeviceLayout::new(format.layout, format.capture_channels);
                SampleView::new(in_bytes.as_slice(), device, format.period_frames, ss).ok()
            } else {
                None
            };
            let output = if format.playback_channels > 0 {
                let device = DeviceLayout::new(format.layout, format.playback_channels);
                SampleViewMut::new(out_bytes.as_mut_slice(), device, format.period_frames, ss).ok()
            } else {
                None
            };
            let mut period = Period {
                frames: format.period_frames,
                input,
                output,
            };
            handler.process(&mut period);
        }
        core.collect_output(&format);
        core.periods_run += 1;
        true
    }

    /// Run up to `count` periods; returns how many ran.
    pub fn run_periods(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.run_period()).count()
    }

    pub fn start_clock(&self, interval: Duration) -> Result<()> {
        let mut slot = self.clock.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.shared.clocking.store(true, Ordering::SeqCst);
        let client = self.clone();
        let handle = thread::Builder::new()
            .name("sim-clock".into())
            .spawn(move || {
                while client.shared.clocking.load(Ordering::SeqCst) {
                    client.run_period();
                    thread::sleep(interval);
                }
            })
            .map_err(|e| TransferError::exhausted(format!("cannot spawn clock thread: {}", e)))?;
        *slot = Some(handle);
        Ok(())
    }

    pub fn stop_clock(&self) {
        self.shared.clocking.store(false, Ordering::SeqCst);
        let handle = self.clock.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Notify the active handler of a new runtime sample rate.
    pub fn change_sample_rate(&self, sample_rate: u32) {
        self.shared.core.lock().sample_rate = sample_rate;
        if let Some(handler) = self.shared.handler.lock().as_mut() {
            handler.sample_rate_changed(sample_rate);
        }
    }

    /// Simulate the runtime going away: the clock stops and the handler
    /// receives its shutdown notification.
    pub fn shut_down(&self) {
        self.stop_clock();
        if let Some(handler) = self.shared.handler.lock().as_mut() {
            handler.shutdown();
        }
    }

    /// Everything written to playback ports so far, decoded.
    pub fn played(&self) -> Result<AppBuffer> {
        AppBuffer::from_channels(&self.shared.core.lock().played)
    }

    /// Raw bytes of the most recent output period.
    pub fn last_output_bytes(&self) -> Vec<u8> {
        self.shared.core.lock().out_bytes.clone()
    }

    pub fn connections(&self) -> Vec<(Direction, usize, String)> {
        self.shared.core.lock().connections.clone()
    }

    pub fn periods_run(&self) -> u64 {
        self.shared.core.lock().periods_run
    }

    pub fn is_active(&self) -> bool {
        self.shared.handler.lock().is_some()
    }
}

impl CallbackClient for SimulatedClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn negotiate(&mut self, request: &PeriodFormat) -> std::result::Result<PeriodFormat, DeviceFault> {
        let mut core = self.shared.core.lock();
        if !core.formats.contains(&request.format) {
            return Err(DeviceFault::Rejected(format!("format {} not supported", request.format)));
        }
        if !core.layouts.contains(&request.layout) {
            return Err(DeviceFault::Rejected(format!("{:?} buffers not supported", request.layout)));
        }
        let accepted = PeriodFormat {
            sample_rate: core.sample_rate,
            period_frames: core.period_frames,
            ..*request
        };
        let ss = accepted.format.sample_size();
        core.in_bytes = vec![0; accepted.period_frames * accepted.capture_channels * ss];
        core.out_bytes = vec![0; accepted.period_frames * accepted.playback_channels * ss];
        core.played = vec![Vec::new(); accepted.playback_channels];
        core.input_pos = 0;
        core.format = Some(accepted);
        Ok(accepted)
    }

    fn register_port(&mut self, direction: Direction, name: &str) -> Result<usize> {
        let mut core = self.shared.core.lock();
        if core.format.is_none() {
            return Err(TransferError::client("ports registered before negotiation"));
        }
        let ports = match direction {
            Direction::Playback => &mut core.playback_ports,
            Direction::Capture => &mut core.capture_ports,
        };
        ports.push(format!("{}:{}", self.name, name));
        Ok(ports.len() - 1)
    }

    fn connect(&mut self, direction: Direction, port: usize, peer: &str) -> Result<()> {
        if !self.is_active() {
            return Err(TransferError::client("connect before activation"));
        }
        let mut core = self.shared.core.lock();
        let registered = match direction {
            Direction::Playback => core.playback_ports.len(),
            Direction::Capture => core.capture_ports.len(),
        };
        if port >= registered {
            return Err(TransferError::client(format!("no {:?} port {}", direction, port)));
        }
        if let Some(peers) = &core.peers {
            if !peers.iter().any(|p| p == peer) {
                return Err(TransferError::client(format!("no such peer port {}", peer)));
            }
        }
        core.connections.push((direction, port, peer.to_string()));
        Ok(())
    }

    fn disconnect(&mut self, direction: Direction, port: usize, peer: &str) -> Result<()> {
        let mut core = self.shared.core.lock();
        let before = core.connections.len();
        core.connections
            .retain(|(d, p, name)| !(*d == direction && *p == port && name == peer));
        if core.connections.len() == before {
            return Err(TransferError::client(format!("{:?} port {} not connected to {}", direction, port, peer)));
        }
        Ok(())
    }

    fn activate(&mut self, handler: Box<dyn PeriodHandler>) -> Result<()> {
        {
            let mut slot = self.shared.handler.lock();
            if slot.is_some() {
                return Err(TransferError::client("client already active"));
            }
            *slot = Some(handler);
        }
        let auto_clock = self.shared.core.lock().auto_clock;
        if let Some(interval) = auto_clock {
            self.start_clock(interval)?;
        }
        Ok(())
    }

    fn deactivate(&mut self) -> Result<Box<dyn PeriodHandler>> {
        self.stop_clock();
        self.shared
            .handler
            .lock()
            .take()
            .ok_or_else(|| TransferError::client("client not active"))
    }
}
