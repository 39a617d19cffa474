//! Variable-rate map against the simulated IOM.

use std::sync::Arc;

use daq_driver_ueidaq::{Device, DeviceId, DeviceRegistry, Iom, PollStatus, RtVMap};
use ueidaq_core::driver::{FIFO_MODE, TIMESTAMP_CHANNEL};
use ueidaq_core::{DeviceModelKind, Direction, DriverStatus, MapType, SignalType, UeiError};
use ueidaq_driver_mock::{MockIom, MockOp};

const SAMPLES: usize = 3;
const BUFFERS: usize = 2;

struct Fixture {
    mock: MockIom,
    registry: Arc<DeviceRegistry>,
    ai: DeviceId,
    map: RtVMap,
}

/// One AI-201-100 at 1 kHz, channels 0 and 1, three samples per packet.
fn started() -> Fixture {
    let mut fixture = configured(BUFFERS);
    fixture.map.start_map().unwrap();
    fixture
}

fn configured(buffers: usize) -> Fixture {
    let mock = MockIom::new("IOM_0");
    let registry = Arc::new(DeviceRegistry::new());
    let ai = registry
        .register(Device::new("ai0", DeviceModelKind::Ai201_100, 2, 1000.0, &[]).unwrap())
        .unwrap();
    let mut map = RtVMap::new(
        "vmap",
        SAMPLES,
        buffers,
        None,
        Iom::new(mock.clone()),
        Arc::clone(&registry),
    );
    let slot = map.core_mut().add_member(Direction::Input, &[0, 1]);
    map.core_mut().set_device(slot, ai).unwrap();
    map.core_mut()
        .configure_inputs_for_data_source(SAMPLES, 2, &[SignalType::Float32, SignalType::Int32])
        .unwrap();
    Fixture {
        mock,
        registry,
        ai,
        map,
    }
}

fn scans(timestamps: &[u32]) -> Vec<Vec<u32>> {
    timestamps.iter().map(|&t| vec![t, 0x8000, 0x0000]).collect()
}

#[test]
fn test_session_setup() {
    let Fixture { mock, map, .. } = started();
    let session = map.core().session();
    assert_eq!(mock.session_info(session), Some((MapType::RtVMap, 1000.0)));
    let registered = mock.registered_channels(session);
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].words[0], TIMESTAMP_CHANNEL | FIFO_MODE);
    assert!(registered[0].words.iter().all(|w| w & FIFO_MODE != 0));

    let requests = mock.calls_of(MockOp::RequestInputSize);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].devn, Some(2));
}

#[test]
fn test_packets_of_exactly_samples() {
    let Fixture { mock, mut map, .. } = started();

    mock.queue_scans(2, scans(&[10, 11]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NoNewData);
    assert_eq!(map.queued_frames(), 2);

    mock.queue_scans(2, scans(&[12, 13]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    assert_eq!(map.queued_frames(), 1);

    let packet = map.core().packet();
    assert_eq!(packet.samples(), SAMPLES);
    assert_eq!(packet.timestamps(), &[10, 11, 12]);
    for sample in 0..SAMPLES {
        assert_eq!(packet.value(0, sample), Some(0.0));
        assert_eq!(packet.value(1, sample), Some(-10.0));
    }
}

#[test]
fn test_per_sample_timestamps_across_wrap() {
    let Fixture { mock, mut map, .. } = started();
    mock.queue_scans(2, scans(&[0xFFFF_FFFE, 0xFFFF_FFFF, 0x0000_0001]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    assert_eq!(
        map.core().packet().timestamps(),
        &[0xFFFF_FFFE, 0xFFFF_FFFF, 0x1_0000_0001]
    );
    assert_eq!(map.core().last_timestamp(), Some(0x1_0000_0001));
}

#[test]
fn test_driver_overflow_reported() {
    let Fixture { mock, mut map, .. } = started();
    mock.inject(MockOp::Refresh, DriverStatus::FifoOverflow, 1);
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::FifoOverflow);
    assert_eq!(map.core().stats().overflows, 1);
}

#[test]
fn test_full_ring_still_commits() {
    let Fixture { mock, mut map, .. } = configured(1);
    map.start_map().unwrap();

    mock.queue_scans(2, scans(&[10, 11]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NoNewData);
    assert_eq!(map.queued_frames(), 2);

    // Only one of these fits; the rest wait for the next poll.
    mock.queue_scans(2, scans(&[12, 13, 14]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    assert_eq!(map.core().packet().timestamps(), &[10, 11, 12]);
    assert_eq!(map.queued_frames(), 0);

    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NoNewData);
    assert_eq!(map.queued_frames(), 2);
    mock.queue_scans(2, scans(&[15]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    assert_eq!(map.core().packet().timestamps(), &[13, 14, 15]);
    assert_eq!(map.core().stats().overflows, 0);
}

#[test]
fn test_scans_read_at_start_are_kept() {
    let Fixture { mock, mut map, .. } = configured(BUFFERS);
    mock.queue_scans(2, scans(&[20, 21, 22]));
    map.start_map().unwrap();
    assert_eq!(mock.queued_scans(2), 0);

    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    assert_eq!(map.core().packet().timestamps(), &[20, 21, 22]);
}

#[test]
fn test_failed_decode_keeps_frames_until_backlog_overflows() {
    let Fixture {
        mock,
        registry,
        ai,
        mut map,
    } = started();
    let removed = registry.remove(ai);
    assert!(removed.is_some());

    mock.queue_scans(2, scans(&(1..=15).collect::<Vec<u32>>()));
    assert!(matches!(
        map.poll_for_new_packet(),
        Err(UeiError::DeviceNotFound(_))
    ));
    assert_eq!(map.queued_frames(), 3);
    for _ in 0..3 {
        assert!(map.poll_for_new_packet().is_err());
        assert_eq!(map.queued_frames(), SAMPLES * BUFFERS);
    }
    // Nine scans behind a full ring of six.
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::FifoOverflow);

    map.reset_vmap().unwrap();
    assert_eq!(map.queued_frames(), 0);
    assert_eq!(map.core().stats().resets, 1);
    assert_eq!(mock.calls_of(MockOp::Stop).len(), 1);
    assert_eq!(mock.calls_of(MockOp::Start).len(), 2);
    assert!(mock.is_running(map.core().session()));
}

#[test]
fn test_reset_attempts_start_after_stop_failure() {
    let Fixture { mock, mut map, .. } = started();
    mock.queue_scans(2, scans(&[1, 2]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NoNewData);
    assert_eq!(map.queued_frames(), 2);

    mock.inject(MockOp::Stop, DriverStatus::Busy, 1);
    assert!(matches!(map.reset_vmap(), Err(UeiError::Driver { .. })));
    assert_eq!(mock.calls_of(MockOp::Start).len(), 2);
    assert_eq!(map.queued_frames(), 0);
    assert_eq!(map.core().stats().resets, 1);
    assert!(mock.is_running(map.core().session()));

    mock.queue_scans(2, scans(&[3, 4, 5]));
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    assert_eq!(map.core().packet().timestamps(), &[3, 4, 5]);
}

#[test]
fn test_reset_requires_started_map() {
    let Fixture { mut map, .. } = started();
    map.core_mut().stop_map().unwrap();
    assert!(matches!(map.reset_vmap(), Err(UeiError::NotStarted { .. })));
}

#[test]
fn test_sample_count_must_match_configuration() {
    let Fixture { mut map, .. } = started();
    for samples in [1, 2, 4] {
        assert!(matches!(
            map.core_mut().configure_inputs_for_data_source(
                samples,
                2,
                &[SignalType::Float32; 2]
            ),
            Err(UeiError::InvalidSampleCount { .. })
        ));
    }
}

#[test]
fn test_layers_stay_aligned_when_delivery_is_uneven() {
    let mock = MockIom::new("IOM_0");
    let registry = Arc::new(DeviceRegistry::new());
    let mut map = RtVMap::new(
        "vmap",
        2,
        2,
        None,
        Iom::new(mock.clone()),
        Arc::clone(&registry),
    );
    for (name, devn) in [("ai_a", 2), ("ai_b", 3)] {
        let device = registry
            .register(Device::new(name, DeviceModelKind::Ai201_100, devn, 1000.0, &[]).unwrap())
            .unwrap();
        let slot = map.core_mut().add_member(Direction::Input, &[0]);
        map.core_mut().set_device(slot, device).unwrap();
    }
    map.core_mut()
        .configure_inputs_for_data_source(2, 2, &[SignalType::Float32; 2])
        .unwrap();
    map.start_map().unwrap();

    // The second layer lags one scan behind the first.
    mock.queue_scans(2, vec![vec![1, 0x0000], vec![2, 0x4000]]);
    mock.queue_scans(3, vec![vec![0x0000]]);
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NoNewData);
    assert_eq!(map.queued_frames(), 1);

    mock.queue_scans(2, vec![vec![3, 0x8000]]);
    mock.queue_scans(3, vec![vec![0x4000]]);
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);

    let packet = map.core().packet();
    assert_eq!(packet.timestamps(), &[1, 2]);
    assert_eq!(packet.value(0, 0), Some(-10.0));
    assert_eq!(packet.value(0, 1), Some(-5.0));
    assert_eq!(packet.value(1, 0), Some(-10.0));
    assert_eq!(packet.value(1, 1), Some(-5.0));

    // Scan 3 of the first layer waits for its partner.
    assert_eq!(map.queued_frames(), 0);
    mock.queue_scans(3, vec![vec![0x8000]]);
    mock.queue_scans(3, vec![vec![0xC000]]);
    mock.queue_scans(2, vec![vec![4, 0xC000]]);
    assert_eq!(map.poll_for_new_packet().unwrap(), PollStatus::NewData);
    let packet = map.core().packet();
    assert_eq!(packet.timestamps(), &[3, 4]);
    assert_eq!(packet.value(0, 0), Some(0.0));
    assert_eq!(packet.value(1, 0), Some(0.0));
    assert_eq!(packet.value(1, 1), Some(5.0));
}
