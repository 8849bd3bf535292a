mod common;

use common::{controller, report_free, LinkHandle, MockLink};
use laserstream_communication::SerialLink;
use laserstream_core::{Error, StreamingError};
use laserstream_settings::FlowControlMode;

fn link() -> (MockLink, LinkHandle) {
    let handle = LinkHandle::open();
    (MockLink::new("/dev/mock0", handle.clone()), handle)
}

fn tick(ctl: &mut laserstream_communication::StreamController, link: &mut MockLink) {
    ctl.service_tick(Some(link as &mut dyn SerialLink)).unwrap();
    assert!(ctl.bytes_in_flight() <= ctl.capacity());
}

#[test]
fn test_window_fills_then_drains_on_report() {
    let mut ctl = controller(128, FlowControlMode::BufferReport);
    let (mut link, handle) = link();
    for i in 0..5 {
        // 39 characters, 40 on the wire
        ctl.enqueue(format!("G1 X{:<35}", i)).unwrap();
    }

    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands().len(), 3);
    assert_eq!(ctl.bytes_in_flight(), 120);
    assert_eq!(ctl.queued_len(), 2);

    // No consumption evidence, nothing more goes out
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands().len(), 3);

    // 88 free: two commands consumed
    handle.feed(&report_free(88));
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands().len(), 5);
    assert_eq!(ctl.queued_len(), 0);
    assert_eq!(ctl.bytes_in_flight(), 120);

    handle.feed(&report_free(128));
    tick(&mut ctl, &mut link);
    assert!(ctl.is_drained());
    assert_eq!(ctl.progress(), 1.0);
}

#[test]
fn test_commands_leave_in_enqueue_order() {
    let mut ctl = controller(32, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    let expected: Vec<String> = (0..20).map(|i| format!("G0 X{}", i)).collect();
    for cmd in &expected {
        ctl.enqueue(cmd.as_str()).unwrap();
    }

    for _ in 0..40 {
        tick(&mut ctl, &mut link);
        handle.feed(b"ok\r\n");
    }

    assert_eq!(handle.commands(), expected);
    assert_eq!(ctl.queued_len(), 0);
}

#[test]
fn test_legacy_rx_report() {
    let mut ctl = controller(128, FlowControlMode::BufferReport);
    let (mut link, handle) = link();
    for _ in 0..4 {
        ctl.enqueue("X".repeat(49)).unwrap();
    }
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands().len(), 2);

    // 50 bytes still buffered: the first command is consumed
    handle.feed(b"<Run,MPos:0.000,0.000,0.000,WPos:0.000,0.000,0.000,Buf:1,RX:50>\r\n");
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands().len(), 3);
    assert_eq!(ctl.bytes_in_flight(), 100);
}

#[test]
fn test_pause_stops_sending_and_resume_continues() {
    let mut ctl = controller(128, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    ctl.enqueue("G0 X2").unwrap();

    assert!(ctl.set_pause(true));
    let report = ctl.service_tick(Some(&mut link)).unwrap();
    assert_eq!(report.commands_sent, 0);
    assert!(handle.written().is_empty());

    // Input is left unread while paused
    handle.feed(b"ok\n");
    ctl.service_tick(Some(&mut link)).unwrap();
    assert_eq!(handle.0.lock().incoming.len(), 3);

    assert!(ctl.set_pause(false));
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands(), vec!["G0 X1", "G0 X2"]);
}

#[test]
fn test_pause_with_nothing_to_do() {
    let mut ctl = controller(128, FlowControlMode::BufferReport);
    assert!(!ctl.set_pause(true));
    assert!(!ctl.is_paused());
    // Not paused, so there is nothing to resume
    assert!(!ctl.set_pause(false));
}

#[test]
fn test_second_pause_and_second_resume_do_nothing() {
    let mut ctl = controller(128, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();

    assert!(ctl.set_pause(true));
    assert!(!ctl.set_pause(true));
    tick(&mut ctl, &mut link);
    assert!(handle.written().is_empty());

    assert!(ctl.set_pause(false));
    assert!(!ctl.set_pause(false));
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands(), vec!["G0 X1"]);
}

#[test]
fn test_progress_after_reconnect_counts_only_new_job() {
    let mut ctl = controller(128, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    ctl.enqueue("G0 X2").unwrap();
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.commands_in_flight(), 2);

    // Link dropped with both commands unacknowledged
    ctl.link_closed();
    ctl.link_established();
    assert!(ctl.is_drained());

    ctl.enqueue("M5").unwrap();
    tick(&mut ctl, &mut link);
    handle.feed(b"ok\n");
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.progress(), 1.0);
}

#[test]
fn test_oversized_command_rejected_at_enqueue() {
    let mut ctl = controller(16, FlowControlMode::BufferReport);
    let err = ctl.enqueue("G1 X100 Y100 F3000").unwrap_err();
    assert!(matches!(
        err,
        Error::Streaming(StreamingError::CommandTooLarge {
            length: 19,
            capacity: 16
        })
    ));
    assert_eq!(ctl.queued_len(), 0);
    ctl.enqueue("G0 X1").unwrap();
    assert_eq!(ctl.queued_len(), 1);
}

#[test]
fn test_progress_is_monotonic_and_new_job_restarts() {
    let mut ctl = controller(24, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    for i in 0..6 {
        ctl.enqueue(format!("G1 X{}", i)).unwrap();
    }

    let mut last = ctl.progress();
    assert_eq!(last, 0.0);
    while !ctl.is_drained() {
        tick(&mut ctl, &mut link);
        handle.feed(b"ok\n");
        let now = ctl.progress();
        assert!(now >= last);
        assert!((0.0..=1.0).contains(&now));
        last = now;
    }
    assert_eq!(ctl.progress(), 1.0);

    // Next enqueue after the drain starts a fresh job
    ctl.enqueue("M5").unwrap();
    assert_eq!(ctl.progress(), 0.0);
}

#[test]
fn test_cancel_keeps_in_flight_out_of_new_job() {
    let mut ctl = controller(128, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    for i in 0..3 {
        ctl.enqueue(format!("G1 X{}", i)).unwrap();
    }
    tick(&mut ctl, &mut link);
    ctl.enqueue("G1 X9").unwrap();

    assert_eq!(ctl.cancel(), 1);
    assert_eq!(ctl.progress(), 0.0);
    assert_eq!(ctl.commands_in_flight(), 3);

    ctl.enqueue("M5").unwrap();
    handle.feed(b"ok\nok\nok\n");
    tick(&mut ctl, &mut link);
    // Only M5 belongs to this job; it has just been written
    assert_eq!(ctl.progress(), 0.0);
    assert_eq!(handle.commands().last().map(String::as_str), Some("M5"));

    handle.feed(b"ok\n");
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.progress(), 1.0);
}

#[test]
fn test_report_above_capacity_is_desync() {
    let mut ctl = controller(128, FlowControlMode::BufferReport);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    tick(&mut ctl, &mut link);

    handle.feed(&report_free(200));
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.desync_count(), 1);
    assert_eq!(ctl.bytes_in_flight(), 0);
    assert!(ctl.is_drained());
}

#[test]
fn test_status_without_buffer_field_keeps_window() {
    let mut ctl = controller(128, FlowControlMode::BufferReport);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    tick(&mut ctl, &mut link);

    handle.feed(b"<Idle|MPos:1.000,2.000,3.000|FS:0,0>\r\n");
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.bytes_in_flight(), 6);
    let status = ctl.status().unwrap();
    assert_eq!(status.state_text, "Idle");
}

#[test]
fn test_unrecognized_and_split_input() {
    let mut ctl = controller(128, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    tick(&mut ctl, &mut link);

    handle.feed(b"Grbl 1.1h ['$' for help]\r\n<Idle|MPos:1.0");
    tick(&mut ctl, &mut link);
    assert!(ctl.status().is_none());
    assert_eq!(ctl.commands_in_flight(), 1);

    handle.feed(b"00,0.000,0.000|Bf:15,128>\r\no");
    tick(&mut ctl, &mut link);
    assert!(ctl.status().is_some());
    assert_eq!(ctl.commands_in_flight(), 1);

    handle.feed(b"k\r\n");
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.commands_in_flight(), 0);
}

#[test]
fn test_write_failure_keeps_command_queued() {
    let mut ctl = controller(128, FlowControlMode::BufferReport);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    ctl.enqueue("G0 X2").unwrap();

    handle.set_fail_writes(true);
    let err = ctl.service_tick(Some(&mut link)).unwrap_err();
    assert!(err.is_io_error());
    assert_eq!(ctl.queued_len(), 2);
    assert!(!ctl.is_window_reliable());

    ctl.link_established();
    handle.set_fail_writes(false);
    tick(&mut ctl, &mut link);
    assert_eq!(handle.commands(), vec!["G0 X1", "G0 X2"]);
}

#[test]
fn test_only_ok_and_error_retire_in_acknowledge_mode() {
    let mut ctl = controller(128, FlowControlMode::Acknowledge);
    let (mut link, handle) = link();
    ctl.enqueue("G0 X1").unwrap();
    ctl.enqueue("G0 X2").unwrap();
    ctl.enqueue("G0 X3").unwrap();
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.commands_in_flight(), 3);

    handle.feed(b"ALARM:1\r\n[MSG:Reset to continue]\r\n<Alarm|MPos:0,0,0>\r\n");
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.commands_in_flight(), 3);

    handle.feed(b"error:20\r\nok\r\n");
    tick(&mut ctl, &mut link);
    assert_eq!(ctl.commands_in_flight(), 1);
}
