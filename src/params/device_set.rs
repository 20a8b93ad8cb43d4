use std::{ops::Deref, sync::Arc};

use log::debug;

use super::ParameterSet;
use crate::{
    device::{DeviceGuard, DeviceId},
    error::Result,
};

/// A `ParameterSet` living in a specific device's memory.
///
/// It always starts synchronized with the root on the parameters and with a zeroed
/// gradient, a replica never starts from stale gradients.
#[derive(Debug)]
pub struct DeviceParameterSet {
    device: DeviceId,
    set: Arc<ParameterSet>,
}

impl DeviceParameterSet {
    /// Creates a new `DeviceParameterSet` by copying the root's current parameters onto
    /// `device`.
    ///
    /// # Arguments
    /// * `root` - The host resident replica the run started from.
    /// * `device` - The device to allocate the buffers on.
    ///
    /// # Returns
    /// The new set or `ResourceExhaustion` if the device is out of memory.
    pub fn new(root: &ParameterSet, device: DeviceId) -> Result<Self> {
        let _guard = DeviceGuard::bind(device);

        let set = ParameterSet::new(Arc::clone(root.layout()))?;
        root.params().copy_to(set.params())?;

        debug!(device = device.index(), size = set.size(); "allocated device parameters");

        Ok(Self {
            device,
            set: Arc::new(set),
        })
    }

    /// The device holding the buffers.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// A shared handle for binding a solver to these buffers.
    pub fn shared(&self) -> Arc<ParameterSet> {
        Arc::clone(&self.set)
    }
}

impl Deref for DeviceParameterSet {
    type Target = ParameterSet;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}
