mod common;

use std::time::Duration;

use audio_transfer_core::{
    AppBuffer, CallbackSession, Direction, Layout, SampleFormat, SimulatedClient, StreamConfig, TransferError,
    TransferOutcome,
};
use common::{prefix, ramp, test_config, window};

/// Run periods until the session finishes; returns how many ran.
fn drive_until_finished(client: &SimulatedClient, session: &CallbackSession<SimulatedClient>, limit: usize) -> usize {
    let mut periods = 0;
    while !session.finished() && periods < limit {
        assert!(client.run_period());
        periods += 1;
    }
    periods
}

#[test]
fn last_period_is_padded_with_silence() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 256);
    let buffer = AppBuffer::from_channels(&[vec![0.5; 266]]).unwrap();
    let session = CallbackSession::play(client.clone(), buffer, &config).unwrap();

    assert!(client.run_period());
    assert!(!session.finished());
    assert!(client.run_period());
    assert!(session.finished());

    let bytes = client.last_output_bytes();
    assert_eq!(bytes.len(), 256 * 4);
    for frame in bytes[..10 * 4].chunks(4) {
        assert_eq!(f32::from_ne_bytes([frame[0], frame[1], frame[2], frame[3]]), 0.5);
    }
    assert!(bytes[10 * 4..].iter().all(|&b| b == 0), "246 trailing frames must be zero");

    // After completion every period is silence.
    assert!(client.run_period());
    assert!(client.last_output_bytes().iter().all(|&b| b == 0));

    let result = session.close().unwrap();
    assert_eq!(result.outcome, TransferOutcome::Completed);
    assert_eq!(result.frames_played, 266);
}

#[test]
fn interleaved_playback_is_exact() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 128).with_layouts(&[Layout::Interleaved]);
    let buffer = ramp(1000, 2);
    let session = CallbackSession::play(client.clone(), buffer.clone(), &config).unwrap();
    assert_eq!(session.format().layout, Layout::Interleaved);

    assert_eq!(drive_until_finished(&client, &session, 100), 8);
    let played = client.played().unwrap();
    assert_eq!(played.frames(), 1024);
    assert_eq!(prefix(&played, 1000), buffer);
    assert!(played.channel(0)[1000..].iter().all(|&s| s == 0.0));

    session.close().unwrap();
}

#[test]
fn record_fills_the_buffer() {
    let config = test_config();
    let input = ramp(2000, 2);
    let client = SimulatedClient::new("sim", 48000, 128).with_input(input.clone());
    let session = CallbackSession::record(client.clone(), 1000, 2, &config).unwrap();

    assert_eq!(drive_until_finished(&client, &session, 100), 8);
    assert_eq!(session.frames_recorded(), 1000);

    let result = session.close().unwrap();
    assert_eq!(result.capture.unwrap(), prefix(&input, 1000));
}

#[test]
fn priming_periods_are_discarded() {
    let config = StreamConfig {
        priming_periods: 2,
        ..test_config()
    };
    let input = ramp(2000, 1);
    let client = SimulatedClient::new("sim", 48000, 128).with_input(input.clone());
    let session = CallbackSession::record(client.clone(), 1000, 1, &config).unwrap();

    assert_eq!(drive_until_finished(&client, &session, 100), 10);
    let result = session.close().unwrap();
    assert_eq!(result.capture.unwrap(), window(&input, 256, 1000));
}

#[test]
fn cancel_emits_silence_and_stops_counting() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 128);
    let session = CallbackSession::play(client.clone(), ramp(1000, 1), &config).unwrap();

    assert_eq!(client.run_periods(2), 2);
    assert_eq!(session.frames_played(), 256);

    session.cancel_handle().request_cancel();
    assert!(!session.is_running());
    assert_eq!(session.outcome(), Some(TransferOutcome::Cancelled));

    assert!(client.run_period());
    assert!(client.last_output_bytes().iter().all(|&b| b == 0));
    assert_eq!(session.frames_played(), 256);
    assert!(!session.finished());

    let result = session.close().unwrap();
    assert_eq!(result.outcome, TransferOutcome::Cancelled);
    assert_eq!(result.frames_played, 256);
    assert!(!client.is_active());
}

#[test]
fn duplex_completion_follows_capture() {
    let config = test_config();
    let input = ramp(3000, 1);
    let client = SimulatedClient::new("sim", 48000, 128).with_input(input.clone());
    let playback = ramp(300, 2);
    let session = CallbackSession::play_record(client.clone(), playback.clone(), 500, 1, &config).unwrap();

    assert_eq!(drive_until_finished(&client, &session, 100), 4);
    assert_eq!(session.frames_played(), 300);
    assert_eq!(session.frames_recorded(), 500);

    let played = client.played().unwrap();
    assert_eq!(prefix(&played, 300), playback);
    assert!(played.channel(1)[300..].iter().all(|&s| s == 0.0));

    let result = session.close().unwrap();
    assert_eq!(result.outcome, TransferOutcome::Completed);
    assert_eq!(result.playback.unwrap(), playback);
    assert_eq!(result.capture.unwrap(), prefix(&input, 500));
}

#[test]
fn duplex_stops_playback_once_capture_is_done() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 128).with_input(ramp(3000, 1));
    let session = CallbackSession::play_record(client.clone(), ramp(2000, 1), 256, 1, &config).unwrap();

    assert_eq!(drive_until_finished(&client, &session, 100), 2);
    client.run_periods(2);
    assert_eq!(session.frames_played(), 256);
    assert!(client.last_output_bytes().iter().all(|&b| b == 0));
    session.close().unwrap();
}

#[test]
fn runtime_shutdown_is_reported() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 128);
    let session = CallbackSession::play(client.clone(), ramp(10_000, 1), &config).unwrap();
    client.run_periods(3);

    client.shut_down();
    assert!(!session.is_running());
    assert_eq!(session.outcome(), Some(TransferOutcome::Shutdown));
    assert_eq!(session.close().unwrap().outcome, TransferOutcome::Shutdown);
}

#[test]
fn sample_rate_change_is_tracked() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 128);
    let session = CallbackSession::play(client.clone(), ramp(1000, 1), &config).unwrap();
    assert_eq!(session.sample_rate(), 48000);

    client.change_sample_rate(44100);
    assert_eq!(session.sample_rate(), 44100);
    session.close().unwrap();
}

#[test]
fn ports_are_connected_while_active() {
    let config = StreamConfig {
        playback_ports: vec!["system:playback_1".into(), "system:playback_2".into()],
        ..test_config()
    };
    let client = SimulatedClient::new("sim", 48000, 128).with_peers(&["system:playback_1", "system:playback_2"]);
    let session = CallbackSession::play(client.clone(), ramp(100, 2), &config).unwrap();

    assert_eq!(
        client.connections(),
        vec![
            (Direction::Playback, 0, "system:playback_1".to_string()),
            (Direction::Playback, 1, "system:playback_2".to_string()),
        ]
    );
    session.close().unwrap();
    assert!(client.connections().is_empty());
}

#[test]
fn failed_connect_deactivates_the_client() {
    let config = StreamConfig {
        capture_ports: vec!["system:capture_9".into()],
        ..test_config()
    };
    let client = SimulatedClient::new("sim", 48000, 128).with_peers(&["system:capture_1"]);

    let err = CallbackSession::record(client.clone(), 100, 1, &config).err().unwrap();
    assert!(matches!(err, TransferError::Client(_)));
    assert!(!client.is_active());
}

#[test]
fn callback_format_falls_back() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 128)
        .with_formats(&[SampleFormat::Int16])
        .with_layouts(&[Layout::Interleaved]);
    let buffer = ramp(500, 2);
    let session = CallbackSession::play(client.clone(), buffer.clone(), &config).unwrap();
    assert_eq!(session.format().format, SampleFormat::Int16);

    drive_until_finished(&client, &session, 100);
    assert_eq!(prefix(&client.played().unwrap(), 500), buffer);
    assert_eq!(session.close().unwrap().format, SampleFormat::Int16);
}

#[test]
fn clock_thread_drives_the_session() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 64).with_clock(Duration::from_millis(1));
    let buffer = ramp(500, 1);
    let session = CallbackSession::play(client.clone(), buffer.clone(), &config).unwrap();

    assert_eq!(session.wait(Duration::from_secs(10)), Some(TransferOutcome::Completed));
    let result = session.close().unwrap();
    assert_eq!(result.frames_played, 500);
    assert_eq!(prefix(&client.played().unwrap(), 500), buffer);
}

#[test]
fn wait_times_out_while_running() {
    let config = test_config();
    let client = SimulatedClient::new("sim", 48000, 64);
    let session = CallbackSession::play(client.clone(), ramp(500, 1), &config).unwrap();
    assert_eq!(session.wait(Duration::from_millis(20)), None);
    assert!(session.is_running());
}
