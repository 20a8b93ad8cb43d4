use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use crate::{
    device::{self, DeviceId},
    error::{Result, SyncErr},
};

/// One contiguous `f32` region resident on a device, or on the host.
///
/// The lock is never contended in a correct run, the reduce/broadcast protocol hands the
/// buffer between threads so that only one of them touches it at a time.
#[derive(Debug)]
pub struct DeviceBuffer {
    device: Option<DeviceId>,
    data: Mutex<Box<[f32]>>,
}

impl DeviceBuffer {
    /// Allocates a zero-filled buffer on the device bound to the calling thread.
    ///
    /// # Arguments
    /// * `len` - The amount of elements.
    ///
    /// # Returns
    /// The new buffer or `ResourceExhaustion` if the allocation fails.
    pub fn zeroed(len: usize) -> Result<Self> {
        let device = device::current();
        let mut data = Vec::new();

        data.try_reserve_exact(len)
            .map_err(|_| SyncErr::ResourceExhaustion {
                device,
                elements: len,
            })?;

        data.resize(len, 0.);

        Ok(Self {
            device,
            data: Mutex::new(data.into_boxed_slice()),
        })
    }

    /// The device holding this buffer, `None` for the host.
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    /// The amount of elements in the buffer.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grants exclusive access to the buffer's contents.
    pub fn lock(&self) -> MutexGuard<'_, Box<[f32]>> {
        self.data.lock()
    }

    /// Bulk copies `src` into this buffer.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the lengths differ.
    pub fn copy_from_slice(&self, src: &[f32]) -> Result<()> {
        let mut data = self.data.lock();
        check_len("buffer copy", src.len(), data.len())?;
        data.copy_from_slice(src);
        Ok(())
    }

    /// Bulk copies this buffer into `dst`, possibly on another device.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the lengths differ.
    pub fn copy_to(&self, dst: &DeviceBuffer) -> Result<()> {
        if std::ptr::eq(self, dst) {
            return Ok(());
        }

        let src = self.data.lock();
        dst.copy_from_slice(&src)
    }

    /// Adds this buffer element-wise into `dst`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the lengths differ.
    pub fn add_to(&self, dst: &DeviceBuffer) -> Result<()> {
        if std::ptr::eq(self, dst) {
            self.scale(2.);
            return Ok(());
        }

        let src = self.data.lock();
        let mut acc = dst.data.lock();
        check_len("buffer accumulation", src.len(), acc.len())?;

        acc.par_iter_mut()
            .zip(src.par_iter())
            .for_each(|(acc, g)| *acc += g);

        Ok(())
    }

    /// Overwrites every element with `value`.
    pub fn fill(&self, value: f32) {
        self.data.lock().fill(value);
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f32) {
        self.data.lock().par_iter_mut().for_each(|x| *x *= factor);
    }

    /// Copies the contents out into a new vec.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.lock().to_vec()
    }
}

fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(SyncErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}
