use std::collections::{HashMap, HashSet};

use super::DeviceId;

/// Describes how close two devices are in terms of communication cost.
///
/// The topology builder pairs devices sharing a board first, then devices with direct
/// peer access, and only then falls back to plain adjacency in the device list.
pub trait Interconnect {
    /// Whether `a` and `b` sit on the same multi-device board.
    fn same_board(&self, a: DeviceId, b: DeviceId) -> bool;

    /// Whether `a` can copy directly into `b`'s memory.
    fn can_access_peer(&self, a: DeviceId, b: DeviceId) -> bool;
}

/// No knowledge about the machine, devices next to each other in the list are assumed
/// to be close.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adjacent;

impl Interconnect for Adjacent {
    fn same_board(&self, _a: DeviceId, _b: DeviceId) -> bool {
        false
    }

    fn can_access_peer(&self, _a: DeviceId, _b: DeviceId) -> bool {
        false
    }
}

/// An interconnect described up front, usually from the training configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticInterconnect {
    boards: HashMap<DeviceId, usize>,
    peers: HashSet<(DeviceId, DeviceId)>,
}

impl StaticInterconnect {
    /// Creates a new `StaticInterconnect`.
    ///
    /// # Arguments
    /// * `boards` - Groups of devices sharing a board.
    /// * `peer_access` - Pairs of devices with direct peer access, access is symmetric.
    ///
    /// # Returns
    /// A new `StaticInterconnect` instance.
    pub fn new(boards: &[Vec<DeviceId>], peer_access: &[(DeviceId, DeviceId)]) -> Self {
        let boards = boards
            .iter()
            .enumerate()
            .flat_map(|(board, devices)| devices.iter().map(move |&device| (device, board)))
            .collect();

        let peers = peer_access
            .iter()
            .flat_map(|&(a, b)| [(a, b), (b, a)])
            .collect();

        Self { boards, peers }
    }
}

impl Interconnect for StaticInterconnect {
    fn same_board(&self, a: DeviceId, b: DeviceId) -> bool {
        match (self.boards.get(&a), self.boards.get(&b)) {
            (Some(board_a), Some(board_b)) => board_a == board_b,
            _ => false,
        }
    }

    fn can_access_peer(&self, a: DeviceId, b: DeviceId) -> bool {
        self.peers.contains(&(a, b))
    }
}
