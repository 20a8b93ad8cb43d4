use crate::device::DeviceId;

/// A parent/child edge of the synchronization tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePair {
    pub parent: DeviceId,
    pub device: DeviceId,
}

impl DevicePair {
    /// Creates a new `DevicePair`.
    ///
    /// # Arguments
    /// * `parent` - The device that reduces `device`'s gradients and broadcasts back to it.
    /// * `device` - The child device.
    ///
    /// # Returns
    /// A new `DevicePair` instance.
    pub fn new(parent: DeviceId, device: DeviceId) -> Self {
        Self { parent, device }
    }
}

/// The tree describing which device synchronizes directly with which.
///
/// The root is nobody's child, every other device appears as the child of exactly one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    root: DeviceId,
    pairs: Vec<DevicePair>,
}

impl Topology {
    pub(super) fn new(root: DeviceId, pairs: Vec<DevicePair>) -> Self {
        Self { root, pairs }
    }

    /// The device whose solver applies the optimizer update.
    pub fn root(&self) -> DeviceId {
        self.root
    }

    /// The edges of the tree, in the order they were discovered.
    pub fn pairs(&self) -> &[DevicePair] {
        &self.pairs
    }

    /// The amount of devices in the tree.
    pub fn len(&self) -> usize {
        self.pairs.len() + 1
    }

    /// Always false, a topology holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The direct children of `device`, in discovery order.
    pub fn children_of(&self, device: DeviceId) -> impl Iterator<Item = DeviceId> + '_ {
        self.pairs
            .iter()
            .filter(move |pair| pair.parent == device)
            .map(|pair| pair.device)
    }

    /// The parent of `device`, `None` for the root or an unknown device.
    pub fn parent_of(&self, device: DeviceId) -> Option<DeviceId> {
        self.pairs
            .iter()
            .find(|pair| pair.device == device)
            .map(|pair| pair.parent)
    }

    /// The amount of hops between `device` and the root.
    pub fn depth_of(&self, device: DeviceId) -> Option<usize> {
        let mut depth = 0;
        let mut curr = device;

        while curr != self.root {
            curr = self.parent_of(curr)?;
            depth += 1;

            if depth > self.pairs.len() {
                return None;
            }
        }

        Some(depth)
    }
}
