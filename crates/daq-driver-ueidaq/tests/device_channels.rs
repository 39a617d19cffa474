//! Channel list and one-shot flag behaviour of hardware layers.

use daq_driver_ueidaq::{Device, DeviceRegistry};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ueidaq_core::{ChannelListFault, DeviceModelKind, Direction, OneShotFlag, UeiError};

fn ai217() -> Device {
    Device::new("ai0", DeviceModelKind::Ai217_803, 0, 1000.0, &[]).unwrap()
}

fn strictly_ascending(list: &[u32]) -> bool {
    list.windows(2).all(|w| w[0] < w[1])
}

// =============================================================================
// Channel Lists
// =============================================================================

#[test]
fn test_sorted_subsets_accepted_shuffles_rejected() {
    let device = ai217();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let n = rng.gen_range(2..=16);
        let mut all: Vec<u32> = (0..16).collect();
        all.shuffle(&mut rng);
        let mut list = all[..n].to_vec();
        list.sort_unstable();
        assert!(
            device
                .check_channel_list_and_direction(&list, Direction::Input)
                .is_ok(),
            "sorted list {list:?} rejected"
        );

        let mut shuffled = list.clone();
        shuffled.shuffle(&mut rng);
        if !strictly_ascending(&shuffled) {
            assert!(
                device
                    .check_channel_list_and_direction(&shuffled, Direction::Input)
                    .is_err(),
                "shuffled list {shuffled:?} accepted"
            );
        }

        let mut duplicated = list.clone();
        duplicated.push(list[rng.gen_range(0..n)]);
        duplicated.sort_unstable();
        assert!(device
            .check_channel_list_and_direction(&duplicated, Direction::Input)
            .is_err());
    }
}

#[test]
fn test_out_of_range_and_empty_lists_rejected() {
    let device = ai217();
    assert!(device
        .check_channel_list_and_direction(&[0, 16], Direction::Input)
        .is_err());
    assert!(device
        .check_channel_list_and_direction(&[], Direction::Input)
        .is_err());
    assert!(device.check_channel_and_direction(15, Direction::Input));
    assert!(!device.check_channel_and_direction(0, Direction::Output));
}

#[test]
fn test_every_fault_reported() {
    let device = ai217();
    let err = device
        .check_channel_list_and_direction(&[4, 2, 2, 99], Direction::Input)
        .unwrap_err();
    let faults = match err {
        UeiError::InvalidChannelList { faults, .. } => faults,
        other => panic!("unexpected error: {other}"),
    };
    assert!(faults.contains(&ChannelListFault::NotAscending { channel: 2 }));
    assert!(faults.contains(&ChannelListFault::Duplicate { channel: 2 }));
    assert!(faults.contains(&ChannelListFault::Rejected { channel: 99 }));
}

#[test]
fn test_find_channel_index() {
    let device = ai217();
    device.set_input_channel_list(&[1, 4, 9]).unwrap();
    assert_eq!(device.find_channel_index(1, Direction::Input), Some(0));
    assert_eq!(device.find_channel_index(4, Direction::Input), Some(1));
    assert_eq!(device.find_channel_index(9, Direction::Input), Some(2));
    assert_eq!(device.find_channel_index(2, Direction::Input), None);
    assert_eq!(device.find_channel_index(1, Direction::Output), None);
}

#[test]
fn test_dio_serves_both_directions() {
    let dio = Device::new("dio0", DeviceModelKind::Dio403, 1, 1000.0, &[]).unwrap();
    dio.set_input_channel_list(&[0, 1]).unwrap();
    dio.set_output_channel_list(&[2, 5]).unwrap();
    assert_eq!(dio.channels(Direction::Input), vec![0, 1]);
    assert_eq!(dio.channels(Direction::Output), vec![2, 5]);
    assert!(dio.set_output_channel_list(&[6]).is_err());
    assert_eq!(dio.channels(Direction::Output), vec![2, 5]);
}

// =============================================================================
// One-Shot Flags
// =============================================================================

#[test]
fn test_map_assignment_is_one_shot() {
    let device = ai217();
    assert!(!device.is_map_assigned());
    device.set_map_assignment().unwrap();
    for _ in 0..3 {
        let err = device.set_map_assignment().unwrap_err();
        assert!(matches!(
            err,
            UeiError::AlreadySet {
                flag: OneShotFlag::MapAssignment,
                ..
            }
        ));
    }
    assert!(device.is_map_assigned());
}

#[test]
fn test_hardware_correspondence_claimed_by_registry() {
    let registry = DeviceRegistry::new();
    let id = registry.register(ai217()).unwrap();
    let device = registry.resolve(id).unwrap();
    assert!(device.is_hardware_bound());
    assert!(matches!(
        device.set_hardware_correspondence(),
        Err(UeiError::AlreadySet {
            flag: OneShotFlag::HardwareCorrespondence,
            ..
        })
    ));
    assert!(device.is_hardware_bound());
}

#[test]
fn test_one_shot_under_contention() {
    let device = std::sync::Arc::new(ai217());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let device = std::sync::Arc::clone(&device);
            std::thread::spawn(move || device.set_map_assignment().is_ok())
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}
