//! Integration tests for the simulated IOM
//!
//! These drive the mock purely through the `IomDriver` interface and the
//! controller API, the way the acquisition maps and their tests use it.

use ueidaq_core::driver::{pack_channel, FIFO_MODE, TIMESTAMP_CHANNEL};
use ueidaq_core::{Direction, DriverStatus, IomDriver, MapType};
use ueidaq_driver_mock::*;

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Started fixed-rate session with one input layer in slot 0.
fn dmap_session(iom: &mut MockIom) -> i32 {
    let s = iom.open_session(MapType::RtDMap).unwrap();
    iom.set_scan_rate(s, 10.0).unwrap();
    iom.add_channels(
        s,
        0,
        Direction::Input,
        &[TIMESTAMP_CHANNEL, pack_channel(0, 0, 0), pack_channel(1, 0, 0)],
    )
    .unwrap();
    iom.start(s).unwrap();
    s
}

/// Test that clones share one simulated module
#[test]
fn test_clones_share_state() {
    let mut iom = MockIom::new("IOM_0");
    let controller = iom.clone();
    let s = dmap_session(&mut iom);

    assert_eq!(controller.open_sessions(), vec![s]);
    assert!(controller.is_running(s));
    assert_eq!(controller.session_info(s), Some((MapType::RtDMap, 10.0)));
    assert_eq!(controller.calls_of(MockOp::AddChannels).len(), 1);
    assert_eq!(iom.name(), "IOM_0");
}

/// Test session handles are distinct and released on close
#[test]
fn test_session_lifecycle() {
    let mut iom = MockIom::new("IOM_0");
    let a = iom.open_session(MapType::RtDMap).unwrap();
    let b = iom.open_session(MapType::RtVMap).unwrap();
    assert_ne!(a, b);
    assert_eq!(iom.open_sessions(), vec![a, b]);

    iom.close_session(a).unwrap();
    assert_eq!(iom.close_session(a), Err(DriverStatus::NoSession(a)));
    assert_eq!(iom.open_sessions(), vec![b]);
}

/// Test a failed close still releases the handle
#[test]
fn test_failed_close_releases_handle() {
    let mut iom = MockIom::new("IOM_0");
    let s = dmap_session(&mut iom);
    iom.inject(MockOp::CloseSession, DriverStatus::Timeout, 1);
    assert_eq!(iom.close_session(s), Err(DriverStatus::Timeout));
    assert!(iom.open_sessions().is_empty());
}

/// Test scan rate validation and clamping
#[test]
fn test_scan_rate() {
    let mut iom = MockIom::new("IOM_0");
    iom.set_max_scan_rate(500.0);
    let s = iom.open_session(MapType::RtDMap).unwrap();
    assert_eq!(iom.set_scan_rate(s, 100.0), Ok(100.0));
    assert_eq!(iom.set_scan_rate(s, 2000.0), Ok(500.0));
    assert_eq!(iom.set_scan_rate(s, 0.0), Err(DriverStatus::BadParameter));
    assert_eq!(iom.set_scan_rate(s, f64::NAN), Err(DriverStatus::BadParameter));
}

/// Test calls that are illegal in the current session state
#[test]
fn test_session_state_errors() {
    let mut iom = MockIom::new("IOM_0");
    let s = iom.open_session(MapType::RtDMap).unwrap();
    assert_eq!(iom.start(s), Err(DriverStatus::BadParameter));
    assert_eq!(iom.refresh(s), Err(DriverStatus::NoSession(s)));
    assert_eq!(
        iom.add_channels(s, 0, Direction::Input, &[]),
        Err(DriverStatus::BadParameter)
    );

    iom.add_channels(s, 0, Direction::Input, &[TIMESTAMP_CHANNEL])
        .unwrap();
    assert_eq!(
        iom.request_input_size(s, 0, 4),
        Err(DriverStatus::BadParameter)
    );
    iom.start(s).unwrap();
    assert_eq!(
        iom.add_channels(s, 1, Direction::Input, &[TIMESTAMP_CHANNEL]),
        Err(DriverStatus::Busy)
    );
}

/// Test a fixed-rate layer that has not produced a scan reads as zeros
#[test]
fn test_dmap_without_scan_reads_zeros() {
    let mut iom = MockIom::new("IOM_0");
    let s = dmap_session(&mut iom);
    iom.refresh(s).unwrap();
    let mut buf = Vec::new();
    iom.read_input_map(s, 0, &mut buf).unwrap();
    assert_eq!(words(&buf), vec![0, 0, 0]);
    assert!(iom.read_input_map(s, 7, &mut buf).is_none());
}

/// Test free-running variable-rate bursts carry consecutive timestamps
#[test]
fn test_free_running_vmap_burst() {
    let mut iom = MockIom::free_running("IOM_0", 10);
    let s = iom.open_session(MapType::RtVMap).unwrap();
    iom.add_channels(
        s,
        2,
        Direction::Input,
        &[TIMESTAMP_CHANNEL | FIFO_MODE, pack_channel(0, 0, FIFO_MODE)],
    )
    .unwrap();
    iom.request_input_size(s, 2, 4).unwrap();
    iom.start(s).unwrap();
    iom.refresh(s).unwrap();

    let mut buf = Vec::new();
    iom.read_input_map(s, 2, &mut buf).unwrap();
    let scans = words(&buf);
    assert_eq!(scans.len(), 8);
    let stamps: Vec<u32> = scans.chunks(2).map(|scan| scan[0]).collect();
    assert!(stamps.windows(2).all(|w| w[1] == w[0] + 10));
    for scan in scans.chunks(2) {
        assert!(scan[1] >= 0x0080_0000);
    }
}

/// Test scripted queues drain in order
#[test]
fn test_scripted_queue_drains() {
    let mut iom = MockIom::new("IOM_0");
    let s = dmap_session(&mut iom);
    iom.queue_scans(0, vec![vec![1, 10, 11], vec![2, 20, 21]]);
    assert_eq!(iom.queued_scans(0), 2);

    let mut buf = Vec::new();
    for expected in [vec![1, 10, 11], vec![2, 20, 21], vec![2, 20, 21]] {
        iom.refresh(s).unwrap();
        iom.read_input_map(s, 0, &mut buf).unwrap();
        assert_eq!(words(&buf), expected);
    }
    assert_eq!(iom.queued_scans(0), 0);
}

/// Test fail-after and cleared scenarios
#[test]
fn test_fail_after_scenario() {
    let mut iom = MockIom::new("IOM_0");
    let s = dmap_session(&mut iom);
    iom.push_failure(FailureScenario::After {
        op: MockOp::Refresh,
        successes: 2,
        status: DriverStatus::RefreshFailed,
    });
    assert!(iom.refresh(s).is_ok());
    assert!(iom.refresh(s).is_ok());
    assert_eq!(iom.refresh(s), Err(DriverStatus::RefreshFailed));
    assert_eq!(iom.refresh(s), Err(DriverStatus::RefreshFailed));

    iom.clear_failures();
    assert!(iom.refresh(s).is_ok());
}

/// Test call log records every call, including failed ones
#[test]
fn test_call_log() {
    let mut iom = MockIom::new("IOM_0");
    let s = dmap_session(&mut iom);
    iom.inject(MockOp::Stop, DriverStatus::Busy, 1);
    assert!(iom.stop(s).is_err());

    let ops: Vec<MockOp> = iom.calls().iter().map(|c| c.op).collect();
    assert_eq!(
        ops,
        vec![
            MockOp::OpenSession,
            MockOp::SetScanRate,
            MockOp::AddChannels,
            MockOp::Start,
            MockOp::Stop,
        ]
    );
    let add = &iom.calls_of(MockOp::AddChannels)[0];
    assert_eq!(add.devn, Some(0));
    assert_eq!(add.words.len(), 3);

    iom.clear_calls();
    assert!(iom.calls().is_empty());
    assert_eq!(MockOp::Refresh.to_string(), "refresh");
}
