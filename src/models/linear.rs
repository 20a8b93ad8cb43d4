use std::{num::NonZeroUsize, sync::Arc};

use log::debug;

use crate::{
    data::{InMemoryDataset, Prefetcher, ShardLoader, ShardSpec},
    device::DeviceId,
    error::{Result, SyncErr},
    optimization::Optimizer,
    params::{Tensors, TensorsMut},
    solver::{Net, ReplicaFactory},
};

/// A linear regression model `y = w·x + b` trained on the mean squared error.
///
/// Its learnable tensors are the weights, one per feature, followed by the bias.
pub struct LinearRegression {
    features: usize,
    prefetcher: Prefetcher,
}

impl LinearRegression {
    /// Creates a new `LinearRegression` drawing its batches from `prefetcher`.
    pub fn new(features: usize, prefetcher: Prefetcher) -> Self {
        Self {
            features,
            prefetcher,
        }
    }
}

impl Net for LinearRegression {
    fn param_sizes(&self) -> Vec<usize> {
        vec![self.features, 1]
    }

    fn forward_backward(&mut self, params: Tensors<'_>, mut grads: TensorsMut<'_>) -> Result<f32> {
        let batch = self.prefetcher.next_batch()?;

        if batch.x_size != self.features {
            return Err(SyncErr::SizeMismatch {
                what: "batch features",
                got: batch.x_size,
                expected: self.features,
            });
        }

        let (w, b) = (params.get(0), params.get(1)[0]);
        let n = batch.len() as f32;

        let mut grad_w = vec![0.; self.features];
        let mut grad_b = 0.;
        let mut loss = 0.;

        for (x, y) in batch.rows() {
            let y_pred = w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f32>() + b;
            let err = y_pred - y;

            loss += err * err;
            grad_w.iter_mut().zip(x).for_each(|(g, xi)| *g += 2. * err * xi / n);
            grad_b += 2. * err / n;
        }

        self.prefetcher.recycle(batch);

        grads.get_mut(0).copy_from_slice(&grad_w);
        grads.get_mut(1)[0] = grad_b;

        Ok(loss / n)
    }
}

/// Builds one `LinearRegression` replica per device, each on its own shard of a shared
/// dataset.
pub struct LinearReplicas<O> {
    dataset: Arc<InMemoryDataset>,
    devices: Vec<DeviceId>,
    batch_size: usize,
    seed: u64,
    optimizer: O,
}

impl<O> LinearReplicas<O>
where
    O: Fn(usize) -> Box<dyn Optimizer> + Sync,
{
    /// Creates a new `LinearReplicas`.
    ///
    /// # Arguments
    /// * `dataset` - The training data, split evenly among `devices`.
    /// * `devices` - Every device of the run, in the order their shards are assigned.
    /// * `batch_size` - The amount of samples per replica per iteration.
    /// * `seed` - The base seed, each replica shuffles with `seed + device`.
    /// * `optimizer` - Builds an optimizer for a given amount of parameters.
    pub fn new(
        dataset: Arc<InMemoryDataset>,
        devices: Vec<DeviceId>,
        batch_size: usize,
        seed: u64,
        optimizer: O,
    ) -> Self {
        Self {
            dataset,
            devices,
            batch_size,
            seed,
            optimizer,
        }
    }
}

impl<O> ReplicaFactory for LinearReplicas<O>
where
    O: Fn(usize) -> Box<dyn Optimizer> + Sync,
{
    fn param_sizes(&self) -> Vec<usize> {
        vec![self.dataset.x_size(), 1]
    }

    fn net(&self, device: DeviceId) -> Result<Box<dyn Net>> {
        let index = self
            .devices
            .iter()
            .position(|d| *d == device)
            .ok_or_else(|| SyncErr::InvalidDevices(format!("device {device} has no shard")))?;

        let count = NonZeroUsize::new(self.devices.len())
            .ok_or_else(|| SyncErr::InvalidDevices("no devices to shard among".into()))?;

        let shard = ShardSpec::new(index, count)?;
        let seed = self.seed.wrapping_add(device.index() as u64);
        let loader = ShardLoader::new(Arc::clone(&self.dataset), shard, self.batch_size, seed)?;

        debug!(device = device.index(), shard = index, seed = seed; "built linear replica");

        let prefetcher = Prefetcher::new(loader, Some(device))?;
        Ok(Box::new(LinearRegression::new(self.dataset.x_size(), prefetcher)))
    }

    fn optimizer(&self, size: usize) -> Box<dyn Optimizer> {
        (self.optimizer)(size)
    }
}
