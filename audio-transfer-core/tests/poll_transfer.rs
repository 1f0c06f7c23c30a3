mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use audio_transfer_core::{
    DeviceFault, FaultPoint, Layout, PcmDevice, PcmState, PollDuplex, PollSession, SampleFormat,
    SimulatedPcm, StreamConfig, TransferDelegate, TransferError, TransferOutcome, TransferState,
};
use common::{prefix, ramp, test_config};

#[test]
fn playback_conserves_frames_for_every_chunk_size() {
    let config = test_config();
    let buffer = ramp(1000, 2);

    for chunk in [1usize, 3, 64, 100, 256] {
        let device = SimulatedPcm::playback("hw:0").with_max_chunk(chunk);
        let mut session = PollSession::play(device, buffer.clone(), &config).unwrap();

        assert_eq!(session.run().unwrap(), TransferOutcome::Completed);
        assert_eq!(session.frames_completed(), 1000, "chunk={}", chunk);
        assert!(session.finished());
        assert!(!session.is_running());

        let device = session.device();
        assert_eq!(device.committed_frames(), 1000);
        assert!(device.commits().iter().all(|&n| n <= chunk));
        assert_eq!(device.played().unwrap(), buffer, "chunk={}", chunk);
        assert_eq!(device.state(), PcmState::Setup);

        let result = session.close().unwrap();
        assert!(result.is_complete());
        assert_eq!(result.frames_played, 1000);
        assert_eq!(result.playback.unwrap(), buffer);
    }
}

#[test]
fn capture_conserves_frames_for_every_chunk_size() {
    let config = test_config();
    let source = ramp(1500, 3);

    for chunk in [1usize, 7, 64, 256] {
        let device = SimulatedPcm::capture("hw:1", source.clone()).with_max_chunk(chunk);
        let mut session = PollSession::record(device, 1000, 3, &config).unwrap();

        assert_eq!(session.run().unwrap(), TransferOutcome::Completed);
        assert_eq!(session.frames_completed(), 1000);

        let result = session.close().unwrap();
        assert_eq!(result.frames_recorded, 1000);
        assert_eq!(result.capture.unwrap(), prefix(&source, 1000), "chunk={}", chunk);
    }
}

#[test]
fn negotiation_falls_back_to_int16_planar() {
    let config = test_config();
    let buffer = ramp(300, 2);
    let device = SimulatedPcm::playback("hw:0")
        .with_formats(&[SampleFormat::Int16])
        .with_layouts(&[Layout::Planar]);

    let mut session = PollSession::play(device, buffer.clone(), &config).unwrap();
    assert_eq!(session.params().format, SampleFormat::Int16);
    assert_eq!(session.params().layout, Layout::Planar);

    session.run().unwrap();
    assert_eq!(session.device().played().unwrap(), buffer);
    assert_eq!(session.close().unwrap().format, SampleFormat::Int16);
}

#[test]
fn int32_capture_stays_within_one_quantization_step() {
    let config = StreamConfig {
        format: SampleFormat::Int32,
        ..test_config()
    };
    let data: Vec<f64> = (0..500).map(|i| ((i as f64) * 0.37).sin() * 0.9).collect();
    let source = audio_transfer_core::AppBuffer::from_channels(&[data.clone()]).unwrap();
    let device = SimulatedPcm::capture("hw:1", source).with_formats(&[SampleFormat::Int32]);

    let mut session = PollSession::record(device, 500, 1, &config).unwrap();
    session.run().unwrap();
    let captured = session.close().unwrap().capture.unwrap();
    for (got, want) in captured.channel(0).iter().zip(&data) {
        approx::assert_abs_diff_eq!(*got, *want, epsilon = 1.0 / 2_147_483_648.0);
    }
}

#[test]
fn fallback_only_narrows() {
    let config = StreamConfig {
        format: SampleFormat::Int32,
        ..test_config()
    };
    let device = SimulatedPcm::playback("hw:0").with_formats(&[SampleFormat::Float32]);
    let err = PollSession::play(device, ramp(10, 1), &config).err().unwrap();
    assert!(matches!(err, TransferError::NegotiationFailed(_)));
}

#[test]
fn invalid_requests_fail_before_touching_the_device() {
    let config = test_config();
    let err = PollSession::record(SimulatedPcm::capture("hw:1", ramp(1, 1)), 0, 1, &config)
        .err()
        .unwrap();
    assert!(matches!(err, TransferError::InvalidConfig(_)));

    let err = PollSession::record_triggered(SimulatedPcm::capture("hw:1", ramp(1, 1)), 100, 1, &config)
        .err()
        .unwrap();
    assert!(matches!(err, TransferError::InvalidConfig(_)));

    let bad = StreamConfig {
        periods: 1,
        ..test_config()
    };
    let err = PollSession::play(SimulatedPcm::playback("hw:0"), ramp(10, 1), &bad)
        .err()
        .unwrap();
    assert!(matches!(err, TransferError::InvalidConfig(_)));
}

#[test]
fn playback_recovers_from_one_transient_fault_at_every_state() {
    let config = test_config();
    let buffer = ramp(1000, 2);

    for point in [FaultPoint::WaitReady, FaultPoint::Avail, FaultPoint::Map, FaultPoint::Commit] {
        for fault in [DeviceFault::Xrun, DeviceFault::Suspended] {
            let device = SimulatedPcm::playback("hw:0")
                .with_max_chunk(64)
                .with_resume_busy(2)
                .inject(point, 3, fault.clone());
            let mut session = PollSession::play(device, buffer.clone(), &config).unwrap();

            let outcome = session.run().unwrap();
            assert_eq!(outcome, TransferOutcome::Completed, "{:?} at {:?}", fault, point);
            assert_eq!(session.frames_completed(), 1000, "{:?} at {:?}", fault, point);

            let diagnostics = session.diagnostics();
            match fault {
                DeviceFault::Xrun => assert_eq!(diagnostics.xruns_recovered, 1),
                _ => assert_eq!(diagnostics.suspends_recovered, 1),
            }
        }
    }
}

#[test]
fn capture_recovers_from_one_transient_fault_at_every_state() {
    let config = test_config();

    for point in [FaultPoint::WaitReady, FaultPoint::Avail, FaultPoint::Map, FaultPoint::Commit] {
        for fault in [DeviceFault::Xrun, DeviceFault::Suspended] {
            let device = SimulatedPcm::capture("hw:1", ramp(4000, 1))
                .with_max_chunk(50)
                .inject(point, 2, fault.clone());
            let mut session = PollSession::record(device, 700, 1, &config).unwrap();

            assert_eq!(session.run().unwrap(), TransferOutcome::Completed, "{:?} at {:?}", fault, point);
            assert_eq!(session.frames_completed(), 700);
        }
    }
}

#[test]
fn single_short_commit_is_recovered() {
    let config = test_config();
    let device = SimulatedPcm::playback("hw:0")
        .with_max_chunk(64)
        .inject_short_commit(2, 10)
        .inject_short_commit(5, 1);
    let mut session = PollSession::play(device, ramp(1000, 1), &config).unwrap();

    assert_eq!(session.run().unwrap(), TransferOutcome::Completed);
    assert_eq!(session.frames_completed(), 1000);
    assert_eq!(session.device().committed_frames(), 1000);
    assert_eq!(session.diagnostics().short_commits, 2);
}

#[test]
fn consecutive_short_commits_are_fatal() {
    let config = test_config();
    let device = SimulatedPcm::playback("hw:0")
        .with_max_chunk(64)
        .inject_short_commit(2, 10)
        .inject_short_commit(3, 5);
    let mut session = PollSession::play(device, ramp(1000, 1), &config).unwrap();

    let err = session.run().unwrap_err();
    assert_eq!(
        err,
        TransferError::ShortCommit {
            requested: 64,
            accepted: 5
        }
    );
    assert!(!session.is_running());
    assert!(!session.finished());
    assert_eq!(session.device().state(), PcmState::Setup);
}

#[test]
fn fatal_fault_drops_the_stream() {
    let config = test_config();
    let device = SimulatedPcm::playback("hw:0").inject(FaultPoint::Map, 1, DeviceFault::Other("unplugged".into()));
    let mut session = PollSession::play(device, ramp(1000, 1), &config).unwrap();

    let err = session.run().unwrap_err();
    assert_eq!(err, TransferError::Device(DeviceFault::Other("unplugged".into())));
    assert_eq!(session.device().state(), PcmState::Setup);

    let result = session.close().unwrap();
    assert_eq!(result.outcome, TransferOutcome::Failed);
    assert!(!result.is_complete());
}

#[test]
fn cancellation_stops_at_the_next_iteration() {
    let config = test_config();
    let device = SimulatedPcm::playback("hw:0").with_max_chunk(64);
    let mut session = PollSession::play(device, ramp(1000, 1), &config).unwrap();

    let cancel = session.cancel_handle();
    session.device_mut().on_commit(move |total| {
        if total >= 256 {
            cancel.request_cancel();
        }
    });

    assert_eq!(session.run().unwrap(), TransferOutcome::Cancelled);
    assert_eq!(session.frames_completed(), 256);
    assert!(!session.is_running());
    assert!(!session.finished());

    let result = session.close().unwrap();
    assert_eq!(result.outcome, TransferOutcome::Cancelled);
    assert_eq!(result.frames_played, 256);
}

#[test]
fn cancel_before_run_transfers_nothing() {
    let config = test_config();
    let mut session = PollSession::play(SimulatedPcm::playback("hw:0"), ramp(100, 1), &config).unwrap();
    session.cancel_handle().request_cancel();

    assert_eq!(session.run().unwrap(), TransferOutcome::Cancelled);
    assert_eq!(session.frames_completed(), 0);
    assert_eq!(session.device().committed_frames(), 0);
}

#[test]
fn cancel_during_suspend_is_not_a_recovery() {
    let config = test_config();
    let device = SimulatedPcm::playback("hw:0")
        .with_max_chunk(64)
        .inject(FaultPoint::WaitReady, 2, DeviceFault::Suspended)
        .with_resume_busy(1_000_000);
    let recorder = Arc::new(Recorder::default());
    let mut session = PollSession::play(device, ramp(1000, 1), &config)
        .unwrap()
        .with_delegate(recorder.clone());

    let cancel = session.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.request_cancel();
    });

    assert_eq!(session.run().unwrap(), TransferOutcome::Cancelled);
    canceller.join().unwrap();

    assert_eq!(session.diagnostics().suspends_recovered, 0);
    assert!(recorder.recovered.lock().is_empty());
    assert_eq!(*recorder.finished.lock(), Some(TransferOutcome::Cancelled));
    assert_eq!(session.close().unwrap().outcome, TransferOutcome::Cancelled);
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<TransferState>>,
    recovered: Mutex<Vec<DeviceFault>>,
    finished: Mutex<Option<TransferOutcome>>,
}

impl TransferDelegate for Recorder {
    fn on_state_changed(&self, state: &TransferState) {
        self.states.lock().push(state.clone());
    }

    fn on_fault_recovered(&self, fault: &DeviceFault) {
        self.recovered.lock().push(fault.clone());
    }

    fn on_finished(&self, outcome: TransferOutcome) {
        *self.finished.lock() = Some(outcome);
    }
}

#[test]
fn delegate_sees_every_loop_state() {
    let config = test_config();
    let recorder = Arc::new(Recorder::default());
    let device = SimulatedPcm::playback("hw:0")
        .with_max_chunk(64)
        .inject(FaultPoint::Avail, 4, DeviceFault::Xrun);
    let mut session = PollSession::play(device, ramp(500, 1), &config)
        .unwrap()
        .with_delegate(recorder.clone());
    session.run().unwrap();

    let states = recorder.states.lock();
    for expected in [
        TransferState::WaitReady,
        TransferState::QueryAvailable,
        TransferState::CopyContiguous,
        TransferState::Commit,
        TransferState::Recover(DeviceFault::Xrun),
        TransferState::Done,
    ] {
        assert!(states.contains(&expected), "missing {:?}", expected);
    }
    assert_eq!(states.last(), Some(&TransferState::Done));
    assert_eq!(*recorder.recovered.lock(), vec![DeviceFault::Xrun]);
    assert_eq!(*recorder.finished.lock(), Some(TransferOutcome::Completed));
}

#[test]
fn duplex_completes_when_capture_completes() {
    let config = test_config();
    let source = ramp(3000, 2);
    let playback = SimulatedPcm::playback("hw:0").with_max_chunk(32);
    let capture = SimulatedPcm::capture("hw:1", source.clone()).with_max_chunk(64);

    let mut duplex = PollDuplex::new(playback, capture, ramp(5000, 2), 600, 2, &config).unwrap();
    assert_eq!(duplex.run().unwrap(), TransferOutcome::Completed);
    assert!(duplex.finished());
    assert_eq!(duplex.frames_recorded(), 600);
    assert!(duplex.capture_device().is_some());

    let result = duplex.close().unwrap();
    assert_eq!(result.frames_recorded, 600);
    assert!(result.frames_played <= 5000);
    assert_eq!(result.capture.unwrap(), prefix(&source, 600));
}

#[test]
fn duplex_playback_shorter_than_capture() {
    let config = test_config();
    let playback = SimulatedPcm::playback("hw:0");
    let capture = SimulatedPcm::capture("hw:1", ramp(2000, 1));

    let mut duplex = PollDuplex::new(playback, capture, ramp(100, 1), 900, 1, &config).unwrap();
    assert_eq!(duplex.run().unwrap(), TransferOutcome::Completed);
    assert_eq!(duplex.playback_device().played().unwrap(), ramp(100, 1));

    let result = duplex.close().unwrap();
    assert_eq!(result.frames_played, 100);
    assert_eq!(result.frames_recorded, 900);
}

#[test]
fn duplex_capture_failure_is_reported() {
    let config = test_config();
    let playback = SimulatedPcm::playback("hw:0").with_max_chunk(16);
    let capture = SimulatedPcm::capture("hw:1", ramp(2000, 1)).inject(
        FaultPoint::Commit,
        1,
        DeviceFault::Other("gone".into()),
    );

    let mut duplex = PollDuplex::new(playback, capture, ramp(100_000, 1), 900, 1, &config).unwrap();
    let err = duplex.run().unwrap_err();
    assert_eq!(err, TransferError::Device(DeviceFault::Other("gone".into())));
    assert!(!duplex.is_running());
    assert!(!duplex.finished());

    let result = duplex.close().unwrap();
    assert_eq!(result.outcome, TransferOutcome::Failed);
}

#[test]
fn device_state_follows_the_stream() {
    let config = test_config();
    let mut device = SimulatedPcm::playback("hw:0");
    assert_eq!(device.state(), PcmState::Open);

    let session = PollSession::play(device, ramp(10, 1), &config).unwrap();
    assert_eq!(session.device().state(), PcmState::Prepared);
    drop(session);

    device = SimulatedPcm::playback("hw:0");
    assert!(device.resume().is_err());
}
