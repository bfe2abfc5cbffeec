//! End-to-end session tests against a loopback mock vehicle

mod common;

use common::{MockVehicle, RecordingSource, test_config};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tello_io::core::fault::LoopKind;
use tello_io::core::types::{SessionState, ShutdownReason};
use tello_io::error::Error;
use tello_io::SessionController;
use tello_io::config::AppConfig;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_startup_acks_arrive_before_first_frame_request() {
    // Default timing, with a vehicle slower than a loopback round trip
    let vehicle = MockVehicle::with_delay(Duration::from_millis(50));
    let mut config = AppConfig::default();
    config.control.local_port = 0;
    config.control.vehicle_address = vehicle.addr().to_string();
    let (source, source_log) = RecordingSource::new(true, None);

    let session = SessionController::new(config, Box::new(source));
    let acks = session.subscribe_responses();
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let first = acks.recv_timeout(WAIT).unwrap();
    let second = acks.recv_timeout(WAIT).unwrap();
    assert_eq!(first.payload, "ok");
    assert_eq!(second.payload, "ok");

    let deadline = std::time::Instant::now() + WAIT;
    while source_log.lock().first_grab.is_none() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let first_grab = source_log.lock().first_grab.unwrap();
    assert!(first.received_at < first_grab);
    assert!(second.received_at < first_grab);
    assert_eq!(vehicle.commands()[..2], ["command", "streamon"]);

    session.send_user_command("q").unwrap();
    assert_eq!(session.wait().exit_code(), 0);
}

#[test]
fn test_quit_command_is_not_sent() {
    let vehicle = MockVehicle::start();
    let (source, source_log) = RecordingSource::new(true, None);
    let session = SessionController::new(test_config(&vehicle), Box::new(source));
    session.start().unwrap();

    session.send_user_command("takeoff").unwrap();
    assert_eq!(
        vehicle.wait_for_commands(3, WAIT),
        ["command", "streamon", "takeoff"]
    );

    session.send_user_command("q").unwrap();
    let reason = session.wait();
    assert!(matches!(reason, ShutdownReason::UserRequested(_)));
    assert_eq!(reason.exit_code(), 0);
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(session.teardown_runs(), 1);

    thread::sleep(Duration::from_millis(100));
    assert!(!vehicle.commands().contains(&"q".to_string()));
    assert!(source_log.lock().released);

    // Channel is closed after teardown
    assert!(matches!(
        session.send_user_command("land"),
        Err(Error::Send(_))
    ));
}

#[test]
fn test_video_open_failure_tears_down_once() {
    let vehicle = MockVehicle::start();
    let (source, source_log) = RecordingSource::new(false, None);
    let session = SessionController::new(test_config(&vehicle), Box::new(source));

    let result = session.start();
    assert!(matches!(result, Err(Error::StreamOpen(_))));

    let reason = session.wait_timeout(WAIT).unwrap();
    assert!(matches!(reason, ShutdownReason::StartupFailure(_)));
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(session.teardown_runs(), 1);

    let log = source_log.lock();
    assert_eq!(log.open_attempts, 2);
    assert!(log.released);
    assert!(log.first_grab.is_none());
    drop(log);

    assert_eq!(
        vehicle.wait_for_commands(2, WAIT),
        ["command", "streamon"]
    );
}

#[test]
fn test_stream_end_shuts_down_with_failure() {
    let vehicle = MockVehicle::start();
    let (source, _source_log) = RecordingSource::new(true, Some(3));
    let session = SessionController::new(test_config(&vehicle), Box::new(source));
    session.start().unwrap();

    let reason = session.wait_timeout(WAIT).unwrap();
    match &reason {
        ShutdownReason::LoopFailure { origin, .. } => {
            assert_eq!(*origin, LoopKind::VideoCapture)
        }
        other => panic!("expected loop failure, got {:?}", other),
    }
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(session.teardown_runs(), 1);
    assert_eq!(session.frames_captured(), 3);

    let frame = session.current_frame().unwrap();
    assert_eq!(frame.sequence, 3);
    assert_eq!(frame.data.len(), frame.expected_len());
}

#[test]
fn test_synthetic_frame_limit_ends_session() {
    let vehicle = MockVehicle::start();
    let mut config = test_config(&vehicle);
    config.video.synthetic.frame_limit = Some(5);
    let source = tello_io::video::create_frame_source(&config.video).unwrap();

    let session = SessionController::new(config, source);
    session.start().unwrap();

    let reason = session.wait_timeout(WAIT).unwrap();
    assert!(reason.is_failure());
    assert_eq!(session.frames_captured(), 5);
}

#[test]
fn test_acks_logged_in_arrival_order() {
    let vehicle = MockVehicle::with_reply(|command| format!("ok {}", command));
    let (source, _) = RecordingSource::new(true, None);
    let session = SessionController::new(test_config(&vehicle), Box::new(source));
    let acks = session.subscribe_responses();
    session.start().unwrap();

    let sent: Vec<String> = (0..15).map(|i| format!("speed {}", 10 + i)).collect();
    for command in &sent {
        session.send_user_command(command).unwrap();
        // One outstanding command at a time, as an operator would type them
        let ack = loop {
            let ack = acks.recv_timeout(WAIT).unwrap();
            if ack.payload.starts_with("ok speed") {
                break ack;
            }
        };
        assert_eq!(ack.payload, format!("ok {}", command));
        assert_eq!(ack.from, vehicle.addr());
    }

    assert_eq!(session.responses_received(), 2 + sent.len() as u64);
    session.shutdown(ShutdownReason::UserRequested("test".to_string()));
}

#[test]
fn test_simultaneous_quit_and_fault_tear_down_once() {
    let vehicle = MockVehicle::start();
    let (source, _) = RecordingSource::new(true, None);
    let session = SessionController::new(test_config(&vehicle), Box::new(source));
    session.start().unwrap();

    let barrier = Arc::new(Barrier::new(3));
    let faults = session.fault_handler();

    let quitter = {
        let session = Arc::clone(&session);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            session.send_user_command("q").unwrap();
        })
    };
    let faulter = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            faults.report(
                LoopKind::ControlResponse,
                Error::Receive("connection reset".to_string()),
            );
        })
    };

    barrier.wait();
    session.shutdown(ShutdownReason::UserRequested("ctrl-c".to_string()));
    quitter.join().unwrap();
    faulter.join().unwrap();

    assert_eq!(session.teardown_runs(), 1);
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(session.wait_timeout(Duration::from_millis(10)).is_some());
}

#[test]
fn test_bind_conflict_fails_startup() {
    let vehicle = MockVehicle::start();
    let taken = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    let mut config = test_config(&vehicle);
    config.control.local_port = taken.local_addr().unwrap().port();
    let (source, source_log) = RecordingSource::new(true, None);

    let session = SessionController::new(config, Box::new(source));
    assert!(matches!(session.start(), Err(Error::Bind { .. })));
    assert_eq!(session.wait().exit_code(), 1);
    assert!(source_log.lock().released);
    assert!(vehicle.commands().is_empty());
}

#[test]
fn test_capture_panic_ends_session() {
    let vehicle = MockVehicle::start();
    let mut config = test_config(&vehicle);
    // Skips validation, which would refuse this rate
    config.video.synthetic.fps = f64::NAN;
    let source = tello_io::video::create_frame_source(&config.video).unwrap();

    let session = SessionController::new(config, source);
    let _ = session.start();

    let reason = session.wait_timeout(WAIT).unwrap();
    match &reason {
        ShutdownReason::LoopFailure { origin, error } => {
            assert_eq!(*origin, LoopKind::VideoCapture);
            assert!(error.contains("panicked"));
        }
        other => panic!("expected loop failure, got {:?}", other),
    }
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test]
fn test_prompt_counts_only_transmitted_commands() {
    let vehicle = MockVehicle::start();
    let (source, _) = RecordingSource::new(true, None);
    let session = SessionController::new(test_config(&vehicle), Box::new(source));
    session.start().unwrap();

    let input = std::io::Cursor::new("takeoff\n\nland\nq\n");
    let forwarded = tello_io::prompt::run_prompt(&session, input, std::io::sink()).unwrap();

    assert_eq!(forwarded, 2);
    assert_eq!(session.wait().exit_code(), 0);
    assert_eq!(
        vehicle.wait_for_commands(4, WAIT),
        ["command", "streamon", "takeoff", "land"]
    );
}
