use std::cell::Cell;

use super::DeviceId;

thread_local! {
    static CURRENT: Cell<Option<DeviceId>> = const { Cell::new(None) };
}

/// Returns the device bound to the calling thread, `None` means the host.
pub fn current() -> Option<DeviceId> {
    CURRENT.with(Cell::get)
}

/// Binds `device` to the calling thread until another device is bound.
///
/// # Arguments
/// * `device` - The device every allocation and copy made from this thread targets.
pub fn set_current(device: DeviceId) {
    CURRENT.with(|cell| cell.set(Some(device)));
}

/// Binds a device to the calling thread for as long as the guard lives, then restores
/// whatever was bound before.
#[must_use]
pub struct DeviceGuard {
    previous: Option<DeviceId>,
}

impl DeviceGuard {
    /// Binds `device` to the calling thread.
    ///
    /// # Arguments
    /// * `device` - The device to bind.
    ///
    /// # Returns
    /// A guard restoring the previous binding on drop.
    pub fn bind(device: DeviceId) -> Self {
        let previous = CURRENT.with(|cell| cell.replace(Some(device)));
        Self { previous }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(self.previous));
    }
}
