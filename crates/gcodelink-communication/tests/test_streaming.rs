mod common;

use common::{new_bus, session_config, wait_until, Recorder, TIMEOUT};
use gcodelink_communication::{MockTransport, Session, UploadSource};
use gcodelink_core::{AppEvent, ProtocolVariant, StreamEvent, TelemetryEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const GRBL_BANNER: &str = "Grbl 1.1h ['$' for help]";
const G2CORE_SIGNATURE: &str = r#"{"r":{"fv":0.99,"hp":3,"hv":0,"fb":100.26,"msg":"SYSTEM READY","id":"x"},"f":[1,0,1]}"#;

fn grbl_session(mock: &Arc<MockTransport>, buffer: usize) -> (Session, Recorder) {
    let bus = new_bus();
    let recorder = Recorder::attach(&bus);
    let mut config = session_config().with_variant(ProtocolVariant::AckCounted);
    config.ack_buffer_size = buffer;
    let mut session = Session::with_bus(config, mock.clone(), bus);
    session.open().unwrap();
    (session, recorder)
}

fn is_completed(lines: usize) -> impl Fn(&AppEvent) -> bool {
    move |e| matches!(e, AppEvent::Stream(StreamEvent::Completed { lines: n, .. }) if *n == lines)
}

#[test]
fn test_three_lines_with_room_for_two() {
    // "G1\n" is 3 bytes, so a 6-byte buffer holds exactly two lines
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, recorder) = grbl_session(&mock, 6);

    session
        .start_upload(UploadSource::from_lines(["G1", "G2", "G3"]))
        .unwrap();

    assert!(mock.wait_for_writes(2, TIMEOUT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.written(), vec!["G1", "G2"]);

    mock.push_line("ok");
    assert!(mock.wait_for_writes(3, TIMEOUT));
    assert_eq!(mock.written(), vec!["G1", "G2", "G3"]);

    mock.push_line("ok");
    mock.push_line("ok");
    session.wait_for_upload().unwrap();

    let snapshot = session.flow_controller().unwrap().snapshot();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.credit, 6);
    assert_eq!(recorder.count(is_completed(3)), 1);

    session.close().unwrap();
}

#[test]
fn test_stop_while_blocked_on_credit() {
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, recorder) = grbl_session(&mock, 6);

    session
        .start_upload(UploadSource::from_lines(["G1", "G2", "G3", "G4", "G5"]))
        .unwrap();
    assert!(mock.wait_for_writes(2, TIMEOUT));

    session.stop().unwrap();
    assert!(!session.is_uploading());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.written().len(), 2);

    let snapshot = session.flow_controller().unwrap().snapshot();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.credit, 6);
    assert!(!snapshot.start);
    assert_eq!(
        recorder.count(|e| matches!(e, AppEvent::Stream(StreamEvent::Cancelled { lines: 2 }))),
        1
    );

    // Late acks for the cancelled lines change nothing
    mock.push_line("ok");
    assert!(mock.wait_until_drained(TIMEOUT));
    assert_eq!(session.flow_controller().unwrap().credit(), 6);

    session.close().unwrap();
}

#[test]
fn test_pause_resume_is_content_transparent() {
    let auto_ack = Arc::new(AtomicBool::new(false));
    let responder_flag = Arc::clone(&auto_ack);
    let mock = Arc::new(
        MockTransport::new()
            .with_boot_lines([GRBL_BANNER])
            .with_responder(move |_| {
                if responder_flag.load(Ordering::SeqCst) {
                    vec!["ok".to_string()]
                } else {
                    Vec::new()
                }
            }),
    );
    let (mut session, recorder) = grbl_session(&mock, 16);

    let lines: Vec<String> = (1..=10).map(|i| format!("G1 X{}", i)).collect();
    session
        .start_upload(UploadSource::from_lines(lines.clone()))
        .unwrap();

    // "G1 Xn\n" is 6 bytes; two fit in 16
    assert!(mock.wait_for_writes(2, TIMEOUT));
    session.pause().unwrap();
    mock.push_line("ok");
    mock.push_line("ok");

    // A line already waiting for credit may still go out; nothing after it
    thread::sleep(Duration::from_millis(100));
    let written_while_paused = mock.written().len();
    assert!(written_while_paused <= 3);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(mock.written().len(), written_while_paused);

    auto_ack.store(true, Ordering::SeqCst);
    for _ in 2..written_while_paused {
        mock.push_line("ok");
    }
    session.resume().unwrap();
    session.wait_for_upload().unwrap();

    assert_eq!(mock.written(), lines);
    assert_eq!(recorder.count(is_completed(10)), 1);
    assert_eq!(
        recorder.count(|e| matches!(e, AppEvent::Stream(StreamEvent::Paused))),
        1
    );
    assert_eq!(
        recorder.count(|e| matches!(e, AppEvent::Stream(StreamEvent::Resumed))),
        1
    );

    session.close().unwrap();
}

#[test]
fn test_acks_resolve_lines_in_order() {
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, _recorder) = grbl_session(&mock, 128);
    let controller = session.flow_controller().unwrap();

    session
        .start_upload(UploadSource::from_lines(["G0 X1", "G1 X10 Y10"]))
        .unwrap();
    assert!(mock.wait_for_writes(2, TIMEOUT));
    assert!(wait_until(|| controller.snapshot().pending == vec![6, 11]));

    mock.push_line("ok");
    assert!(wait_until(|| controller.snapshot().pending == vec![11]));
    assert_eq!(controller.credit(), 128 - 11);

    mock.push_line("ok");
    session.wait_for_upload().unwrap();
    session.close().unwrap();
}

#[test]
fn test_error_line_pauses_upload() {
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, recorder) = grbl_session(&mock, 128);
    let controller = session.flow_controller().unwrap();

    session
        .start_upload(UploadSource::from_lines(["G1", "G2", "G3"]))
        .unwrap();
    assert!(mock.wait_for_writes(3, TIMEOUT));

    mock.push_line("error:20");
    assert!(wait_until(|| controller.is_paused()));
    assert_eq!(controller.snapshot().pending.len(), 2);
    assert!(recorder.wait_for(|e| matches!(e, AppEvent::Telemetry(TelemetryEvent::Error { .. }))));
    assert!(recorder.wait_for(|e| matches!(e, AppEvent::Stream(StreamEvent::Paused))));

    mock.push_line("ok");
    mock.push_line("ok");
    session.wait_for_upload().unwrap();
    assert_eq!(recorder.count(is_completed(3)), 1);

    session.close().unwrap();
}

#[test]
fn test_interactive_command_during_upload_keeps_acks_aligned() {
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, _recorder) = grbl_session(&mock, 128);
    let controller = session.flow_controller().unwrap();

    session
        .start_upload(UploadSource::from_lines(["G1 X1"]))
        .unwrap();
    assert!(mock.wait_for_writes(1, TIMEOUT));
    session.send_command("G4 P1").unwrap();

    assert!(wait_until(|| controller.snapshot().pending == vec![6, 6]));
    mock.push_line("ok");
    mock.push_line("ok");
    session.wait_for_upload().unwrap();
    assert_eq!(controller.credit(), 128);

    session.close().unwrap();
}

#[test]
fn test_line_longer_than_buffer_fails_upload() {
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, recorder) = grbl_session(&mock, 8);

    session
        .start_upload(UploadSource::from_lines(["G1 X1000 Y1000"]))
        .unwrap();
    session.wait_for_upload().unwrap();

    assert!(mock.written().is_empty());
    assert_eq!(
        recorder.count(|e| matches!(e, AppEvent::Stream(StreamEvent::Failed { .. }))),
        1
    );
    assert_eq!(session.flow_controller().unwrap().credit(), 8);
    session.close().unwrap();
}

#[test]
fn test_query_credit_upload() {
    let mock = Arc::new(MockTransport::new().with_boot_lines([G2CORE_SIGNATURE]));
    let bus = new_bus();
    let recorder = Recorder::attach(&bus);
    let mut config = session_config().with_variant(ProtocolVariant::QueryCredit);
    config.query_slots = 2;
    let mut session = Session::with_bus(config, mock.clone(), bus);
    session.open().unwrap();

    session
        .start_upload(UploadSource::from_lines(["G1 X1", "G1 X2", "G1 X3", "G1 X4"]))
        .unwrap();

    let gcode = |mock: &MockTransport| -> Vec<String> {
        mock.written()
            .into_iter()
            .filter(|line| !line.starts_with('{'))
            .collect()
    };

    assert!(wait_until(|| mock.written().iter().any(|l| l == r#"{"qr":null}"#)));
    assert_eq!(gcode(&mock), vec!["G1 X1", "G1 X2"]);

    mock.push_line(r#"{"r":{"qr":2},"f":[1,0,11]}"#);
    session.wait_for_upload().unwrap();

    assert_eq!(gcode(&mock), vec!["G1 X1", "G1 X2", "G1 X3", "G1 X4"]);
    assert!(recorder.wait_for(|e| matches!(e, AppEvent::Telemetry(TelemetryEvent::FreeBuffer(2)))));
    assert_eq!(recorder.count(is_completed(4)), 1);

    session.close().unwrap();
}

#[test]
fn test_generic_passthrough() {
    let mock = Arc::new(MockTransport::new());
    let bus = new_bus();
    let recorder = Recorder::attach(&bus);
    let mut session = Session::with_bus(session_config(), mock.clone(), bus);
    session.open().unwrap();

    session
        .start_upload(UploadSource::from_lines(["M3 S1000", "; comment", "G1 X1", "M5"]))
        .unwrap();
    session.wait_for_upload().unwrap();

    assert_eq!(mock.written(), vec!["M3 S1000", "G1 X1", "M5"]);
    assert_eq!(recorder.count(is_completed(3)), 1);
    assert_eq!(
        recorder.count(|e| matches!(e, AppEvent::Stream(StreamEvent::ProgressLine(_)))),
        3
    );
    session.close().unwrap();
}

#[test]
fn test_buffer_status_never_reports_overflow() {
    let mock = Arc::new(
        MockTransport::new()
            .with_boot_lines([GRBL_BANNER])
            .with_responder(|_| vec!["ok".to_string()]),
    );
    let (mut session, recorder) = grbl_session(&mock, 32);

    let lines: Vec<String> = (0..200).map(|i| format!("G1 X{} Y{}", i, i * 2)).collect();
    session
        .start_upload(UploadSource::from_lines(lines.clone()))
        .unwrap();
    session.wait_for_upload().unwrap();

    assert_eq!(mock.written(), lines);
    for event in recorder.events() {
        if let AppEvent::Telemetry(TelemetryEvent::BufferStatus { available, total }) = event {
            assert!(available <= total);
            assert_eq!(total, 32);
        }
    }
    session.close().unwrap();
}

#[test]
fn test_command_before_upload_holds_its_bytes() {
    // "$H\n" and "G1\n" are 3 bytes each; the firmware holds at most 6
    let mock = Arc::new(MockTransport::new().with_boot_lines([GRBL_BANNER]));
    let (mut session, recorder) = grbl_session(&mock, 6);
    let controller = session.flow_controller().unwrap();

    session.send_command("$H").unwrap();
    session
        .start_upload(UploadSource::from_lines(["G1", "G2", "G3", "G4"]))
        .unwrap();

    assert!(mock.wait_for_writes(2, TIMEOUT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.written(), vec!["$H", "G1"]);
    assert_eq!(controller.snapshot().in_flight(), 6);

    // Homing finished: its ok frees its own bytes, not G1's
    mock.push_line("ok");
    assert!(mock.wait_for_writes(3, TIMEOUT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.written(), vec!["$H", "G1", "G2"]);
    assert_eq!(controller.snapshot().pending, vec![3, 3]);

    mock.push_line("ok");
    assert!(mock.wait_for_writes(4, TIMEOUT));
    mock.push_line("ok");
    assert!(mock.wait_for_writes(5, TIMEOUT));
    mock.push_line("ok");
    mock.push_line("ok");
    session.wait_for_upload().unwrap();

    assert_eq!(mock.written(), vec!["$H", "G1", "G2", "G3", "G4"]);
    assert_eq!(controller.credit(), 6);
    assert_eq!(recorder.count(is_completed(4)), 1);
    session.close().unwrap();
}
