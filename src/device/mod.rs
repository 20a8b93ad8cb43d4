mod context;
mod interconnect;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub use context::{DeviceGuard, current, set_current};
pub use interconnect::{Adjacent, Interconnect, StaticInterconnect};

/// Identifies one compute device attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(usize);

impl DeviceId {
    /// Creates a new `DeviceId`.
    ///
    /// # Arguments
    /// * `index` - The physical index of the device.
    ///
    /// # Returns
    /// A new `DeviceId` instance.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the physical index of the device.
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for DeviceId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
