use std::collections::HashSet;

use p2p_sync::{
    device::{Adjacent, DeviceId, StaticInterconnect},
    topology::{self, DevicePair, Topology},
};

fn devices(n: usize) -> Vec<DeviceId> {
    (0..n).map(DeviceId::new).collect()
}

fn assert_single_tree(devices: &[DeviceId], topology: &Topology) {
    assert_eq!(topology.root(), devices[0]);
    assert_eq!(topology.pairs().len(), devices.len() - 1);

    let mut children = HashSet::new();
    for DevicePair { parent, device } in topology.pairs() {
        assert!(devices.contains(parent));
        assert!(devices.contains(device));
        assert_ne!(*device, topology.root());
        assert!(children.insert(*device), "device {device} has two parents");
    }

    for device in devices {
        assert!(
            topology.depth_of(*device).is_some(),
            "device {device} can't reach the root"
        );
    }
}

#[test]
fn every_size_yields_a_single_tree() {
    for n in 1..=16 {
        let devices = devices(n);
        let topology = topology::compute(&devices, &Adjacent).unwrap();

        assert_single_tree(&devices, &topology);
    }
}

#[test]
fn pairing_is_idempotent() {
    for n in 1..=16 {
        let devices = devices(n);

        let first = topology::compute(&devices, &Adjacent).unwrap();
        let second = topology::compute(&devices, &Adjacent).unwrap();

        assert_eq!(first, second);
    }
}

#[test]
fn four_devices_pair_neighbours_first() {
    let topology = topology::compute(&devices(4), &Adjacent).unwrap();

    assert_eq!(
        topology.pairs(),
        [
            DevicePair::new(DeviceId::new(0), DeviceId::new(1)),
            DevicePair::new(DeviceId::new(2), DeviceId::new(3)),
            DevicePair::new(DeviceId::new(0), DeviceId::new(2)),
        ]
    );
}

#[test]
fn unordered_device_ids_keep_the_first_as_root() {
    let devices: Vec<_> = [5, 2, 7].into_iter().map(DeviceId::new).collect();
    let topology = topology::compute(&devices, &Adjacent).unwrap();

    assert_single_tree(&devices, &topology);
    assert_eq!(topology.root(), DeviceId::new(5));
}

#[test]
fn boards_and_peers_still_yield_a_single_tree() {
    for n in 2..=16 {
        let devices = devices(n);

        // two devices per board, every board can reach the next one
        let boards: Vec<Vec<_>> = devices.chunks(2).map(<[DeviceId]>::to_vec).collect();
        let peers: Vec<_> = devices
            .windows(3)
            .map(|window| (window[0], window[2]))
            .collect();

        let interconnect = StaticInterconnect::new(&boards, &peers);
        let topology = topology::compute(&devices, &interconnect).unwrap();

        assert_single_tree(&devices, &topology);
    }
}
